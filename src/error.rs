//! Error types for veilnet-provider.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in veilnet-provider.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Session admission was rejected: the requested proposal is not the
    /// one currently advertised.
    #[error("proposal does not exist")]
    InvalidProposal,

    /// The referenced session is unknown.
    #[error("session does not exist")]
    SessionNotExists,

    /// The identity on the request does not match the session's consumer.
    #[error("wrong session owner")]
    WrongSessionOwner,

    /// The first invoice was not settled within the admission window.
    /// The session has already been destroyed when this is returned.
    #[error("first invoice was not paid: {0}")]
    FirstInvoiceNotPaid(String),

    /// The payment engine terminated with a fatal error.
    #[error("payment engine failure: {0}")]
    PaymentEngine(String),

    /// Hermes settlement error (URL resolution, promise request, reveal).
    #[error("hermes error: {0}")]
    Hermes(String),

    /// Promise storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Peer-to-peer channel error.
    #[error("p2p channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
