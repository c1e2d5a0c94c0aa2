//! Peer-to-peer channel contract.
//!
//! The session core only needs a narrow capability from the transport:
//! registering a topic handler, sending a request and awaiting its
//! reply, and closing the channel. The wire transport behind it is an
//! external collaborator.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Topic used for session keep-alive pings.
pub const TOPIC_KEEP_ALIVE: &str = "p2p-keep-alive";

/// Handler invoked for inbound messages on a registered topic.
///
/// Returns the reply payload; an empty reply is the protocol's OK.
pub type HandlerFn = Box<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// A peer-to-peer channel to one consumer.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Register a handler for inbound messages on `topic`.
    fn handle(&self, topic: &'static str, handler: HandlerFn);

    /// Send a message on `topic` and await the peer's reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed, the send fails, or no
    /// reply arrives within `timeout`.
    async fn send(&self, topic: &str, message: &[u8], timeout: Duration) -> Result<Vec<u8>>;

    /// Close the channel. Idempotent.
    fn close(&self);

    /// Whether the channel has been closed.
    fn is_closed(&self) -> bool;
}

/// Keep-alive ping exchanged over [`TOPIC_KEEP_ALIVE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAlivePing {
    /// Id of the session being kept alive.
    pub session_id: String,
}

impl KeepAlivePing {
    /// Encode the ping for the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode a ping received from the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid ping.
    pub fn decode(data: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(data).map_err(|e| Error::Serialization(e.to_string()))
    }
}
