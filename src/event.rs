//! Application event bus.
//!
//! A small topic-tagged publish/subscribe layer shared by the session
//! manager and the hermes promise handler. Publication is synchronous;
//! subscriber handlers run on dedicated dispatcher tasks, off the
//! publisher's thread.

use crate::identity::{Address, Identity};
use crate::payment::promise::Promise;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Session lifecycle events.
pub const TOPIC_SESSION: &str = "session";
/// Per-session earnings with the running total.
pub const TOPIC_TOKENS_EARNED: &str = "tokens-earned";
/// Every persisted settlement promise.
pub const TOPIC_HERMES_PROMISE: &str = "hermes-promise";
/// Node status transitions.
pub const TOPIC_NODE: &str = "node";
/// Service status transitions.
pub const TOPIC_SERVICE_STATUS: &str = "service-status";

/// Status tag carried by session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The session was admitted and stored.
    Created,
    /// The consumer confirmed the session as established.
    Acknowledged,
    /// The session was removed from the store.
    Removed,
}

/// A session lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Session id.
    pub id: String,
    /// Consumer owning the session.
    pub consumer_id: Identity,
    /// Service type of the proposal the session runs under.
    pub service_type: String,
    /// Lifecycle status tag.
    pub status: SessionStatus,
}

/// Earnings accumulated by one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokensEarned {
    /// Provider identity the earnings accrue to.
    pub provider_id: Identity,
    /// Session the earnings were produced by.
    pub session_id: String,
    /// Running agreement total.
    pub total: u128,
}

/// A settlement promise obtained from the hermes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HermesPromiseEvent {
    /// The countersigned promise.
    pub promise: Promise,
    /// Settlement authority that signed it.
    pub hermes_id: Address,
    /// Provider the promise is redeemable by.
    pub provider_id: Identity,
}

/// Node status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// The node came up.
    Started,
    /// The node is shutting down.
    Stopped,
}

/// Service status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// The service instance is starting.
    Starting,
    /// The service instance is serving consumers.
    Running,
    /// The service instance is not running.
    NotRunning,
}

/// An event published on the bus, tagged by topic.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// Session lifecycle event.
    Session(SessionEvent),
    /// Per-session earnings event.
    TokensEarned(TokensEarned),
    /// Persisted settlement promise event.
    HermesPromise(HermesPromiseEvent),
    /// Node status transition.
    Node(NodeStatus),
    /// Service status transition.
    ServiceStatus(ServiceStatus),
}

impl AppEvent {
    /// The topic this event is published under.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Session(_) => TOPIC_SESSION,
            Self::TokensEarned(_) => TOPIC_TOKENS_EARNED,
            Self::HermesPromise(_) => TOPIC_HERMES_PROMISE,
            Self::Node(_) => TOPIC_NODE,
            Self::ServiceStatus(_) => TOPIC_SERVICE_STATUS,
        }
    }
}

/// Default capacity of the underlying broadcast channel.
const BUS_CAPACITY: usize = 256;

/// Topic-tagged publish/subscribe bus.
///
/// Cheap to clone; all clones publish into the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Publication never fails; an event with no subscribers is dropped.
    pub fn publish(&self, event: AppEvent) {
        debug!("publishing event on topic {}", event.topic());
        let _ = self.tx.send(event);
    }

    /// Subscribe a handler to one topic.
    ///
    /// The handler runs on a dedicated dispatcher task, so publishers are
    /// never blocked by subscriber work. The subscription is registered
    /// before this call returns; events published afterwards are seen.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_async<F>(&self, topic: &'static str, handler: F)
    where
        F: Fn(AppEvent) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.topic() == topic => handler(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("event subscriber on {} lagged, missed {} events", topic, missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Subscribe to the raw event stream, all topics included.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
