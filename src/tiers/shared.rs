//! Shared tier
//!
//! The networked shared store enters the engine only through the
//! [`SharedBackend`] contract: a keyed byte store with absolute expiries plus
//! a pub/sub channel for the invalidation bus. [`SharedTier`] adapts a
//! backend to the tier contract; [`InMemorySharedBackend`] is an in-process
//! implementation used by tests and single-node deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{CacheTier, TierEntry, TierKind};
use crate::clock::unix_now;
use crate::error::Result;
use crate::namespace::KeyMapper;

/// Capacity of a subscription channel before slow receivers lose messages.
const SUBSCRIPTION_BUFFER: usize = 256;

/// Contract for the networked shared store.
///
/// Implementations own their connection handling; every method may suspend.
/// Keys are tier-local (already namespaced) and expiries are absolute unix
/// seconds, so a backend can enforce TTL server-side or leave it to readers.
#[async_trait]
pub trait SharedBackend: Send + Sync {
    /// Fetch a payload with its absolute expiry.
    async fn get(&self, key: &str) -> Result<Option<(Bytes, f64)>>;

    /// Store a payload with its absolute expiry.
    async fn set(&self, key: &str, payload: Bytes, expires_at: f64) -> Result<()>;

    /// Remove a key, reporting whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Fetch many keys; absent keys are simply missing from the result.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, (Bytes, f64)>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(entry) = self.get(key).await? {
                found.insert(key.clone(), entry);
            }
        }
        Ok(found)
    }

    /// Store many payloads with one absolute expiry.
    async fn set_many(&self, entries: &HashMap<String, Bytes>, expires_at: f64) -> Result<()> {
        for (key, payload) in entries {
            self.set(key, payload.clone(), expires_at).await?;
        }
        Ok(())
    }

    /// Remove every key starting with `prefix`; an empty prefix removes all.
    async fn purge(&self, prefix: &str) -> Result<u64>;

    /// Publish a message on a channel.
    async fn publish(&self, channel: &str, message: Bytes) -> Result<()>;

    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Bytes>>;

    /// Release connections. Idempotent.
    async fn close(&self) -> Result<()>;
}

// =============================================================================
// In-memory backend
// =============================================================================

/// In-process [`SharedBackend`] for tests and single-node use.
pub struct InMemorySharedBackend {
    entries: DashMap<String, (Bytes, f64)>,
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Default for InMemorySharedBackend {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            channels: DashMap::new(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }
}

impl InMemorySharedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn channel(&self, name: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_BUFFER).0)
            .clone()
    }
}

#[async_trait]
impl SharedBackend for InMemorySharedBackend {
    async fn get(&self, key: &str) -> Result<Option<(Bytes, f64)>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &str, payload: Bytes, expires_at: f64) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key.to_string(), (payload, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.remove(key).is_some())
    }

    async fn purge(&self, prefix: &str) -> Result<u64> {
        let before = self.entries.len() as u64;
        if prefix.is_empty() {
            self.entries.clear();
            return Ok(before);
        }
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - self.entries.len() as u64)
    }

    async fn publish(&self, channel: &str, message: Bytes) -> Result<()> {
        // Send errors just mean nobody is subscribed.
        let _ = self.channel(channel).send(message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Bytes>> {
        Ok(self.channel(channel).subscribe())
    }

    async fn close(&self) -> Result<()> {
        self.channels.clear();
        Ok(())
    }
}

// =============================================================================
// Tier adapter
// =============================================================================

/// Adapts a [`SharedBackend`] to the tier contract.
pub struct SharedTier {
    backend: Arc<dyn SharedBackend>,
    mapper: KeyMapper,
    default_ttl: f64,
}

impl SharedTier {
    pub fn new(backend: Arc<dyn SharedBackend>, namespace: &str, default_ttl: f64) -> Self {
        Self {
            backend,
            mapper: KeyMapper::new(namespace),
            default_ttl,
        }
    }

    fn clear_prefix(&self) -> String {
        if self.mapper.namespace() == crate::namespace::DEFAULT_NAMESPACE {
            String::new()
        } else {
            format!("{}:", self.mapper.namespace())
        }
    }
}

#[async_trait]
impl CacheTier for SharedTier {
    fn kind(&self) -> TierKind {
        TierKind::Shared
    }

    async fn get(&self, key: &str) -> Result<Option<TierEntry>> {
        match self.backend.get(key).await? {
            Some((payload, expires_at)) if expires_at >= unix_now() => {
                Ok(Some(TierEntry::new(payload, expires_at)))
            }
            Some(_) => {
                // Reader-side TTL enforcement for backends that keep expired
                // entries around.
                let _ = self.backend.delete(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, payload: Bytes, ttl: Option<f64>) -> Result<bool> {
        let expires_at = unix_now() + ttl.unwrap_or(self.default_ttl);
        self.backend.set(key, payload, expires_at).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.backend.delete(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, TierEntry>> {
        let now = unix_now();
        let raw = self.backend.get_many(keys).await?;
        let mut found = HashMap::new();
        for (key, (payload, expires_at)) in raw {
            if expires_at >= now {
                found.insert(key, TierEntry::new(payload, expires_at));
            } else {
                let _ = self.backend.delete(&key).await;
            }
        }
        Ok(found)
    }

    async fn set_many(&self, entries: &HashMap<String, Bytes>, ttl: Option<f64>) -> Result<bool> {
        let expires_at = unix_now() + ttl.unwrap_or(self.default_ttl);
        self.backend.set_many(entries, expires_at).await?;
        Ok(true)
    }

    async fn clear(&self) -> Result<bool> {
        self.backend.purge(&self.clear_prefix()).await?;
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.backend.close().await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: &str) -> Bytes {
        Bytes::copy_from_slice(data.as_bytes())
    }

    #[tokio::test]
    async fn test_backend_roundtrip() {
        let backend = InMemorySharedBackend::new();
        backend
            .set("k", payload("v"), unix_now() + 60.0)
            .await
            .unwrap();

        let (value, _) = backend.get("k").await.unwrap().unwrap();
        assert_eq!(value, payload("v"));
        assert_eq!(backend.reads(), 1);
        assert_eq!(backend.writes(), 1);
    }

    #[tokio::test]
    async fn test_tier_expires_entries_on_read() {
        let backend = Arc::new(InMemorySharedBackend::new());
        let tier = SharedTier::new(backend.clone(), "default", 60.0);

        tier.set("k", payload("v"), Some(-1.0)).await.unwrap();
        assert!(tier.get("k").await.unwrap().is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_tier_roundtrip_with_ttl() {
        let tier = SharedTier::new(Arc::new(InMemorySharedBackend::new()), "default", 60.0);

        tier.set("k", payload("v"), Some(120.0)).await.unwrap();
        let entry = tier.get("k").await.unwrap().unwrap();
        assert_eq!(entry.payload, payload("v"));
        assert!(entry.remaining_ttl() > 119.0);
    }

    #[tokio::test]
    async fn test_clear_respects_namespace_prefix() {
        let backend = Arc::new(InMemorySharedBackend::new());
        let a = SharedTier::new(backend.clone(), "a", 60.0);
        let b = SharedTier::new(backend.clone(), "b", 60.0);

        a.set("a:k", payload("1"), None).await.unwrap();
        b.set("b:k", payload("2"), None).await.unwrap();

        a.clear().await.unwrap();
        assert!(a.get("a:k").await.unwrap().is_none());
        assert!(b.get("b:k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bulk_operations() {
        let tier = SharedTier::new(Arc::new(InMemorySharedBackend::new()), "default", 60.0);

        let mut entries = HashMap::new();
        entries.insert("k1".to_string(), payload("1"));
        entries.insert("k2".to_string(), payload("2"));
        tier.set_many(&entries, None).await.unwrap();

        let keys = vec!["k1".to_string(), "k3".to_string()];
        let found = tier.get_many(&keys).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("k1"));
    }

    #[tokio::test]
    async fn test_pubsub_delivers_to_subscriber() {
        let backend = InMemorySharedBackend::new();
        let mut rx = backend.subscribe("events").await.unwrap();

        backend.publish("events", payload("hello")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), payload("hello"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let backend = InMemorySharedBackend::new();
        backend.publish("events", payload("x")).await.unwrap();
    }
}
