//! Payment-channel data model.
//!
//! Exchange messages arrive from the consumer, promises come back from
//! the hermes, and the pairing of the two is tracked per payment
//! channel. The channel id is derived deterministically from the
//! provider and hermes addresses.

use crate::error::{Error, Result};
use crate::identity::{parse_address, Address, Identity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain-separation prefix for channel-id derivation.
const CHANNEL_ID_PREFIX: &[u8] = b"veilnet:channel:v1";

/// A consumer-signed payment authorization covering a running total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeMessage {
    /// Chain the payment settles on.
    pub chain_id: i64,
    /// Correlates a sequence of promises under one cumulative total.
    pub agreement_id: u64,
    /// Cumulative amount authorized under the agreement.
    pub agreement_total: u128,
    /// Amount covered by this message.
    pub amount: u128,
    /// Provider address the payment is for.
    pub provider: String,
    /// Settlement authority chosen by the consumer.
    pub hermes_id: Address,
    /// Consumer signature over the message.
    pub signature: String,
}

/// A settlement-authority-countersigned promise, redeemable on-chain
/// once its payment secret is revealed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promise {
    /// Chain the promise settles on.
    pub chain_id: i64,
    /// Promised amount.
    pub amount: u128,
    /// Settlement fee baked into the promise.
    pub fee: u128,
    /// Hashlock guarding the promise.
    pub hashlock: String,
    /// Hermes signature.
    pub signature: String,
}

/// Request body sent to the hermes to obtain a promise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPromise {
    /// The consumer-signed exchange message being settled.
    pub exchange_message: ExchangeMessage,
    /// Settlement fee the provider is willing to pay.
    pub transactor_fee: u128,
    /// Hex-encoded recovery blob, encrypted to the provider's own key.
    pub r_recovery_data: String,
}

/// A promise persisted by the provider, keyed by channel and agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HermesPromise {
    /// Payment-channel id derived from provider and hermes addresses.
    pub channel_id: String,
    /// Provider identity.
    pub identity: Identity,
    /// Settlement authority address.
    pub hermes_id: Address,
    /// The countersigned promise.
    pub promise: Promise,
    /// Hex-encoded payment secret unlocking the promise.
    pub r: String,
    /// Whether R has been revealed to the hermes. Monotonic per key.
    pub revealed: bool,
    /// Agreement the promise settles under.
    pub agreement_id: u64,
}

/// Payload the provider encrypts to itself so a lost R can be recovered
/// through the hermes later. Serialized as a canonical JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RRecoveryDetails {
    /// Hex-encoded payment secret.
    #[serde(rename = "R")]
    pub r: String,
    /// Agreement the secret belongs to.
    #[serde(rename = "AgreementID")]
    pub agreement_id: u64,
}

/// Settlement fees quoted by the fee provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeesResponse {
    /// Quoted settlement fee.
    pub fee: u128,
    /// Moment the quote stops being valid.
    pub valid_until: DateTime<Utc>,
}

impl FeesResponse {
    /// Whether the quote is still valid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.valid_until
    }
}

/// Derive the deterministic payment-channel id for a provider/hermes
/// pair.
///
/// Both inputs must be `0x`-prefixed account addresses; the result is
/// stable across restarts and case-insensitive in its inputs.
///
/// # Errors
///
/// Returns an error if either address fails to parse.
pub fn derive_channel_id(provider_address: &str, hermes_address: &str) -> Result<String> {
    let provider = parse_address(provider_address)
        .map_err(|e| Error::Hermes(format!("could not derive channel id: {e}")))?;
    let hermes = parse_address(hermes_address)
        .map_err(|e| Error::Hermes(format!("could not derive channel id: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(CHANNEL_ID_PREFIX);
    hasher.update(provider.as_bytes());
    hasher.update(hermes.as_bytes());
    Ok(format!("0x{}", hex::encode(hasher.finalize())))
}
