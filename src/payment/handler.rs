//! Hermes promise handler.
//!
//! A serialized pipeline that turns settled consumer payments into
//! persisted settlement promises. Payment engines enqueue
//! `(R, exchange message)` tuples; a single worker drains the queue in
//! arrival order, obtains a countersigned promise from the hermes,
//! persists it, publishes earnings, and reveals the payment secret.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 HermesPromiseHandler                    │
//! ├─────────────────────────────────────────────────────────┤
//! │  request_promise(r, em) ──▶ bounded queue (100)         │
//! │                                   │                     │
//! │                            single worker                │
//! │                                   │                     │
//! │   derive channel id ─▶ encrypt R recovery payload       │
//! │   ─▶ hermes RequestPromise ─▶ persist (revealed=false)  │
//! │   ─▶ publish HermesPromise + TokensEarned               │
//! │   ─▶ hermes RevealR ─▶ persist (revealed=true)          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Serialization is deliberate: it preserves agreement ordering with
//! the hermes and keeps R recovery free of concurrent storms.

use crate::error::{Error, Result};
use crate::event::{
    AppEvent, EventBus, HermesPromiseEvent, NodeStatus, ServiceStatus, TokensEarned, TOPIC_NODE,
    TOPIC_SERVICE_STATUS,
};
use crate::identity::{Address, Identity};
use crate::payment::hermes::{
    Encryption, FeeProvider, HermesApiError, HermesCallerFactory, HermesHttpRequester,
    HermesUrlGetter,
};
use crate::payment::promise::{
    derive_channel_id, ExchangeMessage, FeesResponse, HermesPromise, RRecoveryDetails,
    RequestPromise,
};
use crate::payment::storage::{PromiseStorage, StorageError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Capacity of the request queue. Producers block once it fills.
const QUEUE_CAPACITY: usize = 100;

/// Dependencies of the promise handler.
pub struct HermesPromiseHandlerDeps {
    /// Store for obtained promises.
    pub promise_storage: Arc<dyn PromiseStorage>,
    /// Settlement fee source.
    pub fee_provider: Arc<dyn FeeProvider>,
    /// Encryption keyed by the provider's own address.
    pub encryption: Arc<dyn Encryption>,
    /// Bus for earnings and promise events.
    pub event_bus: EventBus,
    /// Resolves hermes base URLs.
    pub hermes_url_getter: Arc<dyn HermesUrlGetter>,
    /// Builds a caller for a resolved URL.
    pub hermes_caller_factory: HermesCallerFactory,
    /// Chain id used when fetching settlement fees.
    pub chain_id: i64,
}

struct EnqueuedRequest {
    r: Vec<u8>,
    em: ExchangeMessage,
    provider_id: Identity,
    session_id: String,
    err_tx: mpsc::Sender<Error>,
}

/// Serialized, queued hermes promise pipeline.
pub struct HermesPromiseHandler {
    deps: HermesPromiseHandlerDeps,
    queue_tx: mpsc::Sender<EnqueuedRequest>,
    queue_rx: Mutex<Option<mpsc::Receiver<EnqueuedRequest>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    started: AtomicBool,
    transactor_fee: RwLock<Option<FeesResponse>>,
}

impl HermesPromiseHandler {
    /// Create an idle handler. The worker starts on the first
    /// service-running event after [`subscribe`].
    ///
    /// [`subscribe`]: HermesPromiseHandler::subscribe
    #[must_use]
    pub fn new(deps: HermesPromiseHandlerDeps) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            deps,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            stop_tx,
            stop_rx,
            started: AtomicBool::new(false),
            transactor_fee: RwLock::new(None),
        })
    }

    /// Register the handler on the bus: the worker starts on the first
    /// service-running event and stops on a node-stopped event.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) {
        let handler = Arc::clone(self);
        bus.subscribe_async(TOPIC_NODE, move |event| {
            if let AppEvent::Node(NodeStatus::Stopped) = event {
                handler.do_stop();
            }
        });

        let handler = Arc::clone(self);
        bus.subscribe_async(TOPIC_SERVICE_STATUS, move |event| {
            if let AppEvent::ServiceStatus(ServiceStatus::Running) = event {
                handler.start_once();
            }
        });
    }

    /// Enqueue a settled payment for settlement with the hermes.
    ///
    /// Returns the per-request error channel: an error is delivered
    /// before the channel closes; a channel that closes with no value
    /// means the request succeeded. Blocks while the queue is full.
    pub async fn request_promise(
        &self,
        r: Vec<u8>,
        em: ExchangeMessage,
        provider_id: Identity,
        session_id: String,
    ) -> mpsc::Receiver<Error> {
        let (err_tx, err_rx) = mpsc::channel(1);
        let entry = EnqueuedRequest {
            r,
            em,
            provider_id,
            session_id,
            err_tx,
        };

        if let Err(send_err) = self.queue_tx.send(entry).await {
            let entry = send_err.0;
            let _ = entry
                .err_tx
                .try_send(Error::Hermes("promise handler is stopped".to_string()));
        }

        err_rx
    }

    fn start_once(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            handler.update_fee().await;
            handler.run().await;
        });
    }

    fn do_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn run(&self) {
        debug!("hermes promise handler started");
        let Some(mut queue_rx) = self.queue_rx.lock().take() else {
            return;
        };
        let mut stop_rx = self.stop_rx.clone();

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                entry = queue_rx.recv() => {
                    match entry {
                        Some(entry) => self.process_request(entry).await,
                        None => break,
                    }
                }
            }
        }
        debug!("hermes promise handler stopped");
    }

    async fn process_request(&self, entry: EnqueuedRequest) {
        let err_tx = entry.err_tx.clone();
        if let Err(e) = self.settle_request(entry).await {
            let _ = err_tx.send(e).await;
        }
        // Dropping the last sender closes the per-request channel.
    }

    async fn settle_request(&self, entry: EnqueuedRequest) -> Result<()> {
        let provider_id = entry.provider_id.clone();
        let hermes_id = entry.em.hermes_id;

        let channel_id = derive_channel_id(&provider_id.address, &hermes_id.to_hex())?;

        if !self.fee_is_valid() {
            self.update_fee().await;
        }

        let details = RRecoveryDetails {
            r: hex::encode(&entry.r),
            agreement_id: entry.em.agreement_id,
        };
        let payload = serde_json::to_vec(&details)
            .map_err(|e| Error::Serialization(format!("could not marshal R recovery details: {e}")))?;

        let provider_address = provider_id.to_address()?;
        let encrypted = self
            .deps
            .encryption
            .encrypt(provider_address, &payload)
            .map_err(|e| Error::Crypto(format!("could not encrypt R recovery details: {e}")))?;

        let request = RequestPromise {
            exchange_message: entry.em.clone(),
            transactor_fee: self.cached_fee(),
            r_recovery_data: hex::encode(encrypted),
        };

        let caller = self.hermes_caller(hermes_id)?;
        let promise = match caller.request_promise(request).await {
            Ok(promise) => promise,
            Err(e) => {
                self.handle_hermes_error(e, &provider_id, hermes_id)
                    .await
                    .map_err(|e| Error::Hermes(format!("hermes request promise error: {e}")))?;
                // Recovered (or vacuously satisfied): nothing left to
                // settle for this exchange message.
                return Ok(());
            }
        };

        if promise.chain_id != entry.em.chain_id {
            debug!(
                "Received promise with wrong chain id from hermes. Expected {}, got {}",
                entry.em.chain_id, promise.chain_id
            );
        }

        let mut stored = HermesPromise {
            channel_id,
            identity: provider_id.clone(),
            hermes_id,
            promise: promise.clone(),
            r: hex::encode(&entry.r),
            revealed: false,
            agreement_id: entry.em.agreement_id,
        };

        match self.deps.promise_storage.store(stored.clone()) {
            Ok(()) | Err(StorageError::AttemptToOverwrite) => {}
            Err(e) => return Err(Error::Storage(format!("could not store hermes promise: {e}"))),
        }

        self.deps
            .event_bus
            .publish(AppEvent::HermesPromise(HermesPromiseEvent {
                promise,
                hermes_id,
                provider_id: provider_id.clone(),
            }));
        self.deps
            .event_bus
            .publish(AppEvent::TokensEarned(TokensEarned {
                provider_id,
                session_id: entry.session_id,
                total: entry.em.agreement_total,
            }));

        self.reveal_r(&mut stored)
            .await
            .map_err(|e| Error::Hermes(format!("hermes reveal r error: {e}")))
    }

    async fn reveal_r(&self, promise: &mut HermesPromise) -> Result<()> {
        if promise.revealed {
            return Ok(());
        }

        let identity = promise.identity.clone();
        let caller = self.hermes_caller(promise.hermes_id)?;
        if let Err(e) = caller
            .reveal_r(&promise.r, &identity.address, promise.agreement_id)
            .await
        {
            // The handled error is authoritative.
            self.handle_hermes_error(e, &identity, promise.hermes_id)
                .await
                .map_err(|e| Error::Hermes(format!("could not reveal R: {e}")))?;
        }

        promise.revealed = true;
        match self.deps.promise_storage.store(promise.clone()) {
            Ok(()) | Err(StorageError::AttemptToOverwrite) => Ok(()),
            Err(e) => Err(Error::Storage(format!("could not store hermes promise: {e}"))),
        }
    }

    async fn handle_hermes_error(
        &self,
        err: HermesApiError,
        provider_id: &Identity,
        hermes_id: Address,
    ) -> Result<()> {
        match err {
            HermesApiError::NeedsRRecovery { recovery_data } => {
                self.recover_r(&recovery_data, provider_id, hermes_id).await
            }
            HermesApiError::NoPreviousPromise => {
                info!("no previous promise on hermes, marking R as revealed");
                Ok(())
            }
            HermesApiError::Other(message) => Err(Error::Hermes(message)),
        }
    }

    async fn recover_r(
        &self,
        recovery_data: &str,
        provider_id: &Identity,
        hermes_id: Address,
    ) -> Result<()> {
        info!("Recovering R for a prior agreement");
        let decoded = hex::decode(recovery_data)
            .map_err(|e| Error::Hermes(format!("could not decode R recovery details: {e}")))?;

        let provider_address = provider_id.to_address()?;
        let decrypted = self
            .deps
            .encryption
            .decrypt(provider_address, &decoded)
            .map_err(|e| Error::Crypto(format!("could not decrypt R recovery details: {e}")))?;

        let details: RRecoveryDetails = serde_json::from_slice(&decrypted).map_err(|e| {
            Error::Serialization(format!("could not unmarshal R recovery details: {e}"))
        })?;

        let caller = self.hermes_caller(hermes_id)?;
        caller
            .reveal_r(&details.r, &provider_id.address, details.agreement_id)
            .await
            .map_err(|e| Error::Hermes(format!("could not reveal recovered R: {e}")))?;

        info!("R recovered and revealed");
        Ok(())
    }

    fn hermes_caller(&self, hermes_id: Address) -> Result<Arc<dyn HermesHttpRequester>> {
        let url = self
            .deps
            .hermes_url_getter
            .hermes_url(hermes_id)
            .map_err(|e| Error::Hermes(format!("could not get hermes URL: {e}")))?;
        Ok((self.deps.hermes_caller_factory)(&url))
    }

    async fn update_fee(&self) {
        match self
            .deps
            .fee_provider
            .fetch_settle_fees(self.deps.chain_id)
            .await
        {
            Ok(fees) => *self.transactor_fee.write() = Some(fees),
            Err(e) => {
                // The hermes validates fees; a stale value is re-fetched
                // on the next request.
                warn!("could not fetch settlement fees, ignoring: {e}");
            }
        }
    }

    fn fee_is_valid(&self) -> bool {
        self.transactor_fee
            .read()
            .as_ref()
            .is_some_and(FeesResponse::is_valid)
    }

    fn cached_fee(&self) -> u128 {
        self.transactor_fee.read().as_ref().map_or(0, |fees| fees.fee)
    }
}
