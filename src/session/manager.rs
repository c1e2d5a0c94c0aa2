//! Session manager: admission, acknowledgement and destruction.
//!
//! Admission runs under a single creation lock, deliberately held
//! across the first-invoice wait so concurrent requests cannot thrash
//! each other's stale-session eviction. The payment engine and the
//! session watch each other's termination through two independent
//! watchers: the engine is stopped when the session's `done` signal
//! closes, and the session is destroyed when the engine fails.

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::event::{AppEvent, EventBus, SessionEvent, SessionStatus};
use crate::identity::{Address, Identity};
use crate::p2p::{Channel, KeepAlivePing, TOPIC_KEEP_ALIVE};
use crate::payment::engine::PaymentEngineFactory;
use crate::session::store::{FindOpts, SessionStore};
use crate::session::{generate_session_id, DoneSignal, Proposal, Session};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Starts and provisions provider-side sessions for one service
/// instance.
pub struct SessionManager {
    current_proposal: Proposal,
    service_id: String,
    store: Arc<SessionStore>,
    engine_factory: PaymentEngineFactory,
    publisher: EventBus,
    channel: Option<Arc<dyn Channel>>,
    config: ProviderConfig,
    creation_lock: Mutex<()>,
}

impl SessionManager {
    /// Create a new session manager.
    #[must_use]
    pub fn new(
        current_proposal: Proposal,
        service_id: String,
        store: Arc<SessionStore>,
        engine_factory: PaymentEngineFactory,
        publisher: EventBus,
        channel: Option<Arc<dyn Channel>>,
        config: ProviderConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            current_proposal,
            service_id,
            store,
            engine_factory,
            publisher,
            channel,
            config,
            creation_lock: Mutex::new(()),
        })
    }

    /// Start a session for the given consumer.
    ///
    /// Admits the request against the advertised proposal, evicts any
    /// stale session of the same consumer and service type, spawns the
    /// payment engine and blocks until the consumer settles the first
    /// invoice. Only then is the session visible in the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProposal`] on a proposal mismatch and
    /// [`Error::FirstInvoiceNotPaid`] if the first invoice does not
    /// settle within the configured window; in the latter case the
    /// session has already been destroyed.
    pub async fn start(
        self: &Arc<Self>,
        consumer_id: Identity,
        accountant_id: Address,
        proposal_id: i64,
    ) -> Result<Session> {
        let _guard = self.creation_lock.lock().await;

        if self.current_proposal.id != proposal_id {
            return Err(Error::InvalidProposal);
        }

        self.clear_stale_session(&consumer_id);

        let session = Session {
            id: generate_session_id(),
            service_id: self.service_id.clone(),
            consumer_id,
            accountant_id,
            proposal: self.current_proposal.clone(),
            created_at: Utc::now(),
            done: DoneSignal::new(),
        };

        let engine = (self.engine_factory)(
            Identity::from_address(self.current_proposal.provider_id.clone()),
            session.consumer_id.clone(),
            accountant_id,
            &session.id,
        )?;

        // Stop the engine once the session is finished, whichever side
        // terminates first.
        {
            let done = session.done.clone();
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                done.closed().await;
                engine.stop();
            });
        }

        {
            let manager = Arc::clone(self);
            let engine = Arc::clone(&engine);
            let session = session.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.start().await {
                    error!("Payment engine error: {e}");
                    manager.destroy_session(&session).await;
                }
            });
        }

        info!("Waiting for the first invoice to be paid");
        if let Err(e) = engine
            .wait_first_invoice(self.config.first_invoice_timeout())
            .await
        {
            self.destroy_session_locked(&session);
            return Err(Error::FirstInvoiceNotPaid(e.to_string()));
        }

        {
            let manager = Arc::clone(self);
            let session = session.clone();
            let channel = self.channel.clone();
            tokio::spawn(async move {
                manager.keep_alive_loop(session, channel).await;
            });
        }

        self.store.add(session.clone());
        self.publisher
            .publish(AppEvent::Session(session_event(&session, SessionStatus::Created)));

        Ok(session)
    }

    /// Mark the session as successfully established as far as the
    /// consumer is concerned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotExists`] for an unknown id and
    /// [`Error::WrongSessionOwner`] for a consumer mismatch.
    pub async fn acknowledge(&self, consumer_id: &Identity, session_id: &str) -> Result<()> {
        let _guard = self.creation_lock.lock().await;

        let session = self.store.find(session_id).ok_or(Error::SessionNotExists)?;
        if session.consumer_id != *consumer_id {
            return Err(Error::WrongSessionOwner);
        }

        self.publisher.publish(AppEvent::Session(session_event(
            &session,
            SessionStatus::Acknowledged,
        )));

        Ok(())
    }

    /// Destroy a session by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotExists`] for an unknown id and
    /// [`Error::WrongSessionOwner`] for a consumer mismatch.
    pub async fn destroy(&self, consumer_id: &Identity, session_id: &str) -> Result<()> {
        let session = self.store.find(session_id).ok_or(Error::SessionNotExists)?;
        if session.consumer_id != *consumer_id {
            return Err(Error::WrongSessionOwner);
        }

        if let Some(ref channel) = self.channel {
            channel.close();
        }
        self.destroy_session(&session).await;

        Ok(())
    }

    /// Evict a stale session for the consumer and current service type.
    ///
    /// The lookup happens before the teardown task is spawned so the
    /// newly created session can never be the one evicted; the teardown
    /// itself runs in the background, in its own critical section, so
    /// admission is not blocked on it.
    fn clear_stale_session(self: &Arc<Self>, consumer_id: &Identity) {
        let stale = self.store.find_by(FindOpts {
            peer: Some(consumer_id),
            service_type: &self.current_proposal.service_type,
        });
        if let Some(stale) = stale {
            info!(
                "Cleaning stale session {} for {} consumer",
                stale.id, consumer_id.address
            );
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.destroy_session(&stale).await;
            });
        }
    }

    async fn destroy_session(&self, session: &Session) {
        let _guard = self.creation_lock.lock().await;
        self.destroy_session_locked(session);
    }

    /// Remove the session and close its `done` signal. The caller holds
    /// the creation lock. Closing `done` is idempotent, so racing
    /// destruction paths are safe.
    fn destroy_session_locked(&self, session: &Session) {
        let was_stored = self.store.find(&session.id).is_some();
        self.store.remove(&session.id);
        session.done.close();
        if was_stored {
            self.publisher
                .publish(AppEvent::Session(session_event(session, SessionStatus::Removed)));
        }
    }

    /// Per-session liveness loop over the peer-to-peer channel.
    ///
    /// Closing the channel on error exhaustion does not destroy the
    /// session; channel loss may be transient at a higher layer and
    /// destruction cascades through the engine or an explicit destroy.
    async fn keep_alive_loop(&self, session: Session, channel: Option<Arc<dyn Channel>>) {
        let Some(channel) = channel else {
            return;
        };

        // Acknowledge inbound keep-alive pings from the consumer.
        channel.handle(
            TOPIC_KEEP_ALIVE,
            Box::new(|payload| {
                let ping = KeepAlivePing::decode(payload)?;
                debug!("Received keep-alive ping with session id {}", ping.session_id);
                Ok(Vec::new())
            }),
        );

        let mut err_count = 0;
        loop {
            tokio::select! {
                () = session.done.closed() => return,
                () = tokio::time::sleep(self.config.keep_alive.send_interval()) => {
                    match self.send_keep_alive_ping(channel.as_ref(), &session.id).await {
                        Ok(()) => err_count = 0,
                        Err(e) => {
                            warn!("Failed to send keep-alive ping for session {}: {e}", session.id);
                            err_count += 1;
                            if err_count == self.config.keep_alive.max_send_err_count {
                                error!(
                                    "Max keep-alive error count reached, closing p2p channel for session {}",
                                    session.id
                                );
                                channel.close();
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn send_keep_alive_ping(&self, channel: &dyn Channel, session_id: &str) -> Result<()> {
        let message = KeepAlivePing {
            session_id: session_id.to_string(),
        }
        .encode()?;
        channel
            .send(
                TOPIC_KEEP_ALIVE,
                &message,
                self.config.keep_alive.send_timeout(),
            )
            .await
            .map(|_| ())
    }
}

fn session_event(session: &Session, status: SessionStatus) -> SessionEvent {
    SessionEvent {
        id: session.id.clone(),
        consumer_id: session.consumer_id.clone(),
        service_type: session.proposal.service_type.clone(),
        status,
    }
}
