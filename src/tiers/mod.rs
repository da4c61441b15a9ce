//! Cache tiers
//!
//! [`CacheTier`] is the contract every storage level implements. The
//! orchestrator composes an ordered stack of tiers (fastest first) and only
//! ever talks to this trait. Keys crossing this interface are already
//! namespaced; payloads are the opaque framed bytes produced by the codec.

mod disk;
mod memory;
mod shared;

pub use disk::{DiskTier, DiskTierStats};
pub use memory::{MemoryTier, MemoryTierStats};
pub use shared::{InMemorySharedBackend, SharedBackend, SharedTier};

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::clock::unix_now;
use crate::error::Result;

/// Which level of the stack a tier occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// In-process bounded store
    Memory,
    /// Networked shared store
    Shared,
    /// Local persistent store
    Disk,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierKind::Memory => write!(f, "memory"),
            TierKind::Shared => write!(f, "shared"),
            TierKind::Disk => write!(f, "disk"),
        }
    }
}

/// A stored payload with its absolute expiry, as returned by tier reads.
#[derive(Debug, Clone)]
pub struct TierEntry {
    /// Framed payload bytes
    pub payload: Bytes,
    /// Absolute expiry, unix seconds
    pub expires_at: f64,
}

impl TierEntry {
    pub fn new(payload: Bytes, expires_at: f64) -> Self {
        Self {
            payload,
            expires_at,
        }
    }

    /// Seconds until expiry, zero if already past.
    pub fn remaining_ttl(&self) -> f64 {
        (self.expires_at - unix_now()).max(0.0)
    }

    pub fn is_expired(&self) -> bool {
        unix_now() > self.expires_at
    }
}

/// Contract shared by every cache tier.
///
/// Guarantees:
/// - `get` returns `Ok(None)` on miss or expiry and never errors on a miss
/// - `set` reports durability (persistent tiers) or presence (memory)
/// - `delete` is idempotent and reports whether the key existed
/// - `get_many` may return partial results; absent keys are misses
/// - `set_many` reports whether every entry was applied
/// - `clear` removes only this tier's namespace
/// - `close` is idempotent and releases all resources
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Which level this tier occupies.
    fn kind(&self) -> TierKind;

    /// Look up a tier key. Expired entries are removed and reported as a miss.
    async fn get(&self, key: &str) -> Result<Option<TierEntry>>;

    /// Store a payload with an optional TTL override in seconds.
    async fn set(&self, key: &str, payload: Bytes, ttl: Option<f64>) -> Result<bool>;

    /// Remove a key, reporting whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Look up many keys; the result holds only the found ones.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, TierEntry>>;

    /// Store many payloads with one TTL override.
    async fn set_many(&self, entries: &HashMap<String, Bytes>, ttl: Option<f64>) -> Result<bool>;

    /// Remove every entry belonging to this tier's namespace.
    async fn clear(&self) -> Result<bool>;

    /// Release resources. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_kind_display() {
        assert_eq!(TierKind::Memory.to_string(), "memory");
        assert_eq!(TierKind::Shared.to_string(), "shared");
        assert_eq!(TierKind::Disk.to_string(), "disk");
    }

    #[test]
    fn test_tier_entry_remaining_ttl() {
        let entry = TierEntry::new(Bytes::from_static(b"x"), unix_now() + 60.0);
        let remaining = entry.remaining_ttl();
        assert!(remaining > 59.0 && remaining <= 60.0);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_tier_entry_expired() {
        let entry = TierEntry::new(Bytes::from_static(b"x"), unix_now() - 1.0);
        assert!(entry.is_expired());
        assert_eq!(entry.remaining_ttl(), 0.0);
    }
}
