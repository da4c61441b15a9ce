//! Cross-instance invalidation
//!
//! When a shared tier is configured, engines publish key-expiry
//! notifications on a pub/sub channel and delete foreign-origin keys from
//! their local tiers on receipt. Messages carry the origin instance id so an
//! engine never reacts to its own notifications; a key of `"*"` means the
//! whole namespace was cleared. No acknowledgement is exchanged.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::clock::unix_now;
use crate::error::{Error, Result};

/// Wildcard key published by `clear()`.
pub const CLEAR_ALL: &str = "*";

/// One invalidation notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Instance id of the publishing engine
    pub origin: String,
    /// Logical key, or `"*"` for a namespace clear
    pub key: String,
    /// Publish time, unix seconds
    pub timestamp: f64,
}

impl InvalidationMessage {
    pub fn key(origin: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            key: key.into(),
            timestamp: unix_now(),
        }
    }

    pub fn clear(origin: impl Into<String>) -> Self {
        Self::key(origin, CLEAR_ALL)
    }

    pub fn is_clear(&self) -> bool {
        self.key == CLEAR_ALL
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| Error::Serialization(format!("invalidation message encode: {e}")))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| Error::Serialization(format!("invalidation message decode: {e}")))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let message = InvalidationMessage::key("node-1", "user:42");
        let decoded = InvalidationMessage::from_bytes(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert!(!decoded.is_clear());
    }

    #[test]
    fn test_clear_message() {
        let message = InvalidationMessage::clear("node-1");
        assert!(message.is_clear());
        assert_eq!(message.key, CLEAR_ALL);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(InvalidationMessage::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_timestamp_is_recent() {
        let message = InvalidationMessage::key("node-1", "k");
        assert!((unix_now() - message.timestamp).abs() < 1.0);
    }
}
