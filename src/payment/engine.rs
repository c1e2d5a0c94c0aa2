//! Payment engine contract.
//!
//! The engine drives the invoice/payment exchange with one consumer for
//! the lifetime of one session, forwarding each settled payment to the
//! hermes promise handler on its own. The session manager only creates
//! engines, waits for the first invoice, and reacts to termination.

use crate::error::Result;
use crate::identity::{Address, Identity};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Per-session driver of the consumer payment exchange.
#[async_trait]
pub trait PaymentEngine: Send + Sync {
    /// Drive the payment exchange. Blocks for the lifetime of the
    /// session and returns only on fatal error or after [`stop`].
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails fatally; the caller is
    /// expected to destroy the session.
    ///
    /// [`stop`]: PaymentEngine::stop
    async fn start(&self) -> Result<()>;

    /// Wait until the consumer settles the first invoice.
    ///
    /// # Errors
    ///
    /// Returns an error if `timeout` elapses first.
    async fn wait_first_invoice(&self, timeout: Duration) -> Result<()>;

    /// Stop the engine, waking [`start`] and any internal producers.
    /// Idempotent.
    ///
    /// [`start`]: PaymentEngine::start
    fn stop(&self);
}

/// Factory producing a payment engine for one session.
pub type PaymentEngineFactory = Box<
    dyn Fn(Identity, Identity, Address, &str) -> Result<Arc<dyn PaymentEngine>> + Send + Sync,
>;
