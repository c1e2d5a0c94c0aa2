//! Micropayment subsystem for provider-side sessions.
//!
//! Each session runs a payment engine that exchanges invoices for
//! consumer-signed exchange messages. Settled messages flow into the
//! hermes promise handler, which obtains countersigned settlement
//! promises, persists them, and reveals the payment secret that makes
//! them redeemable.
//!
//! # Payment Flow
//!
//! 1. The consumer settles an invoice with a signed exchange message
//! 2. The engine enqueues `(R, exchange message)` with the handler
//! 3. The handler asks the hermes for a countersigned promise,
//!    attaching an R-recovery blob encrypted to the provider itself
//! 4. The promise is persisted unrevealed and earnings are published
//! 5. R is revealed to the hermes and the record is marked revealed

pub mod engine;
pub mod handler;
pub mod hermes;
pub mod promise;
pub mod storage;

pub use engine::{PaymentEngine, PaymentEngineFactory};
pub use handler::{HermesPromiseHandler, HermesPromiseHandlerDeps};
pub use hermes::{
    Encryption, FeeProvider, HermesApiError, HermesCallerFactory, HermesHttpRequester,
    HermesUrlGetter,
};
pub use promise::{
    derive_channel_id, ExchangeMessage, FeesResponse, HermesPromise, Promise, RRecoveryDetails,
    RequestPromise,
};
pub use storage::{MemoryPromiseStorage, PromiseStorage, StorageError};
