//! Hermes caller contract and collaborator interfaces.
//!
//! The hermes is the trusted settlement authority chosen by the
//! consumer. Only its contract lives here; the HTTP client body is an
//! external collaborator resolved per hermes address through the URL
//! getter and caller factory.

use crate::error::Result;
use crate::identity::Address;
use crate::payment::promise::{FeesResponse, Promise, RequestPromise};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by hermes API calls.
///
/// The first two variants are sentinels the promise handler matches on;
/// everything else aborts the current step verbatim.
#[derive(Debug, Clone, Error)]
pub enum HermesApiError {
    /// The hermes requires a prior R to be revealed before it signs a
    /// new promise. Carries the hex-encoded encrypted recovery blob the
    /// provider previously supplied.
    #[error("hermes requires a prior R to be revealed")]
    NeedsRRecovery {
        /// Hex-encoded encrypted `{R, AgreementID}` payload.
        recovery_data: String,
    },

    /// No prior promise exists on the hermes; a pending reveal is
    /// vacuously satisfied.
    #[error("no previous promise exists on the hermes")]
    NoPreviousPromise,

    /// Any other hermes failure.
    #[error("{0}")]
    Other(String),
}

/// HTTP requests to one hermes.
#[async_trait]
pub trait HermesHttpRequester: Send + Sync {
    /// Submit an exchange message and receive a countersigned promise.
    ///
    /// # Errors
    ///
    /// Returns a sentinel or transport error on failure.
    async fn request_promise(
        &self,
        request: RequestPromise,
    ) -> std::result::Result<Promise, HermesApiError>;

    /// Reveal a payment secret for an agreement.
    ///
    /// # Errors
    ///
    /// Returns a sentinel or transport error on failure.
    async fn reveal_r(
        &self,
        r: &str,
        provider: &str,
        agreement_id: u64,
    ) -> std::result::Result<(), HermesApiError>;

    /// Renegotiate the fee baked into an issued promise.
    ///
    /// # Errors
    ///
    /// Returns a sentinel or transport error on failure.
    async fn update_promise_fee(
        &self,
        promise: Promise,
        new_fee: u128,
    ) -> std::result::Result<Promise, HermesApiError>;
}

/// Factory resolving a hermes caller for a base URL.
pub type HermesCallerFactory = Box<dyn Fn(&str) -> Arc<dyn HermesHttpRequester> + Send + Sync>;

/// Resolves the base URL for a hermes address.
pub trait HermesUrlGetter: Send + Sync {
    /// Base URL of the hermes at `hermes_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is unknown.
    fn hermes_url(&self, hermes_id: Address) -> Result<String>;
}

/// Quotes the current settlement fees.
#[async_trait]
pub trait FeeProvider: Send + Sync {
    /// Fetch the settlement fees for a chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the quote cannot be fetched.
    async fn fetch_settle_fees(&self, chain_id: i64) -> Result<FeesResponse>;
}

/// Asymmetric encryption keyed by account address.
///
/// The promise handler encrypts recovery payloads to the provider's own
/// public key so the same provider can decrypt them later.
pub trait Encryption: Send + Sync {
    /// Encrypt `plaintext` to the key behind `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unavailable or encryption fails.
    fn encrypt(&self, address: Address, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt `ciphertext` with the key behind `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unavailable or decryption fails.
    fn decrypt(&self, address: Address, ciphertext: &[u8]) -> Result<Vec<u8>>;
}
