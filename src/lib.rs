//! # veilnet-provider
//!
//! Provider-side session core for the Veilnet decentralized bandwidth
//! marketplace.
//!
//! A provider advertises a service proposal; a consumer initiates a
//! paid session. This crate owns the two state machines at the heart
//! of that exchange:
//!
//! - **Session manager** — admission, stale-session eviction,
//!   keep-alive over the peer-to-peer channel, and destruction of
//!   per-consumer sessions.
//! - **Hermes promise handler** — a serialized pipeline that exchanges
//!   settled payments for countersigned settlement promises from the
//!   hermes, persists them, publishes earnings, and reveals the
//!   payment secret (with an encrypted-recovery path for lost
//!   secrets).
//!
//! Payment engines, the p2p transport, the hermes HTTP client,
//! identity encryption and fee quoting are external collaborators
//! wired in through the contracts in [`payment`] and [`p2p`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use veilnet_provider::{EventBus, ProviderConfig, SessionStore};
//!
//! let config = ProviderConfig::default();
//! let bus = EventBus::new();
//! let store = Arc::new(SessionStore::new());
//! // Wire a SessionManager and HermesPromiseHandler with the
//! // collaborators of the deployment, then admit sessions.
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod p2p;
pub mod payment;
pub mod session;

pub use config::{KeepAliveConfig, ProviderConfig};
pub use error::{Error, Result};
pub use event::{AppEvent, EventBus, NodeStatus, ServiceStatus, SessionStatus};
pub use identity::{Address, Identity};
pub use payment::{HermesPromiseHandler, HermesPromiseHandlerDeps, PaymentEngine};
pub use session::{Proposal, Session, SessionManager, SessionStore};
