//! Session model and lifecycle management.
//!
//! A session is one consumer's paid usage of one advertised proposal.
//! Its `done` signal is a one-shot broadcast: every task working on
//! behalf of the session watches it and exits when it closes.

mod manager;
mod store;

pub use manager::SessionManager;
pub use store::{FindOpts, SessionStore};

use crate::identity::{Address, Identity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// An advertised service offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Numeric proposal id.
    pub id: i64,
    /// Address of the provider advertising the proposal.
    pub provider_id: String,
    /// Service-type tag (e.g. "vpn", "wireguard").
    pub service_type: String,
}

/// One-shot broadcast signal observed by every task tied to a session.
///
/// Closing is idempotent: the signal transitions from open to closed at
/// most once, and a second close is a no-op. All watchers observe the
/// transition without coordinating with each other.
#[derive(Debug, Clone)]
pub struct DoneSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl DoneSignal {
    /// Create a new open signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Close the signal, waking all watchers. Idempotent.
    pub fn close(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether the signal has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal is closed.
    pub async fn closed(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for DoneSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A live provider-side session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque unique id, generated at creation.
    pub id: String,
    /// Identifier of the service instance advertising the proposal.
    pub service_id: String,
    /// Consumer identity the session belongs to.
    pub consumer_id: Identity,
    /// Settlement authority chosen by the consumer.
    pub accountant_id: Address,
    /// Proposal snapshot the session was admitted under.
    pub proposal: Proposal,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// One-shot teardown signal.
    pub done: DoneSignal,
}

/// Generate an opaque session id: 16 random bytes, hex-encoded.
#[must_use]
pub fn generate_session_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}
