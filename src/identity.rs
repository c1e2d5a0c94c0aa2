//! Identities and account addresses.
//!
//! Consumers, providers and settlement authorities are all identified by
//! 20-byte account addresses rendered as `0x`-prefixed hex strings.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 20-byte account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 20]);

impl Address {
    /// Create an address from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the raw address bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Render the address as a `0x`-prefixed lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_address(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_address(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse an account address string into an `Address`.
///
/// # Arguments
///
/// * `address` - address string (e.g., "0x1234...")
///
/// # Errors
///
/// Returns an error if the address format is invalid.
pub fn parse_address(address: &str) -> Result<Address> {
    // Validate format: should start with 0x and be 42 characters total (0x + 40 hex chars)
    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(Error::Config(format!(
            "Invalid address format: must start with '0x', got: {address}"
        )));
    }

    if address.len() != 42 {
        return Err(Error::Config(format!(
            "Invalid address length: expected 42 characters, got {}",
            address.len()
        )));
    }

    let hex_part = &address[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Config(format!(
            "Invalid address: contains non-hex characters: {address}"
        )));
    }

    let bytes = hex::decode(hex_part)
        .map_err(|e| Error::Config(format!("Failed to decode address: {e}")))?;

    let mut address_bytes = [0u8; 20];
    address_bytes.copy_from_slice(&bytes);

    Ok(Address::new(address_bytes))
}

/// Validate that an account address is properly formatted.
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    parse_address(address).is_ok()
}

/// A blockchain-address-shaped identity of a consumer or provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// The account address string backing this identity.
    pub address: String,
}

impl Identity {
    /// Create an identity from an address string.
    ///
    /// The string is taken as-is; use [`Identity::to_address`] when the
    /// strongly typed account address is needed.
    #[must_use]
    pub fn from_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Parse the identity's address string into an [`Address`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backing string is not a valid address.
    pub fn to_address(&self) -> Result<Address> {
        parse_address(&self.address)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_address() {
        let address = "0x742d35Cc6634C0532925a3b844Bc9e7595916Da2";
        let result = parse_address(address);
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_lowercase_address() {
        let address = "0x742d35cc6634c0532925a3b844bc9e7595916da2";
        let result = parse_address(address);
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_prefix() {
        let address = "742d35Cc6634C0532925a3b844Bc9e7595916Da2";
        let result = parse_address(address);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_length() {
        let address = "0x742d35Cc6634C0532925a3b844Bc9e7595916Da";
        let result = parse_address(address);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_hex_chars() {
        let address = "0x742d35Cc6634C0532925a3b844Bc9e7595916DgZ";
        let result = parse_address(address);
        assert!(result.is_err());
    }

    #[test]
    fn test_is_valid_address() {
        assert!(is_valid_address("0x742d35Cc6634C0532925a3b844Bc9e7595916Da2"));
        assert!(!is_valid_address("invalid"));
    }

    #[test]
    fn test_address_hex_round_trip() {
        let address = Address::new([0xAB; 20]);
        let parsed = parse_address(&address.to_hex()).expect("round trip");
        assert_eq!(address, parsed);
    }

    #[test]
    fn test_address_serde() {
        let address = Address::new([7u8; 20]);
        let json = serde_json::to_string(&address).expect("serialize");
        let back: Address = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(address, back);
    }

    #[test]
    fn test_identity_to_address() {
        let identity = Identity::from_address("0x742d35Cc6634C0532925a3b844Bc9e7595916Da2");
        assert!(identity.to_address().is_ok());

        let bad = Identity::from_address("not-an-address");
        assert!(bad.to_address().is_err());
    }
}
