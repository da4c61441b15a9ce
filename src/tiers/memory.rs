//! Memory tier
//!
//! Bounded in-process store with a pluggable eviction discipline and eager
//! TTL enforcement. One lock guards the whole tier; reads observe a
//! consistent `(payload, expiry)` snapshot because recency bookkeeping
//! mutates on hit.
//!
//! # Eviction
//!
//! - Recency (LRU): hits and writes make an entry most-recent; overflow
//!   evicts the least-recent.
//! - Insertion order (FIFO): order is set at write and never changed by
//!   reads; overflow evicts the oldest-inserted.
//! - Frequency (LFU): a counter per entry grows on every hit and write;
//!   overflow evicts the smallest counter, ties broken by oldest access.
//!
//! Eviction runs before insertion, so `len <= max_size` always holds after
//! a write. All operations are O(log n).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use super::{CacheTier, TierEntry, TierKind};
use crate::clock::unix_now;
use crate::config::EvictionPolicy;
use crate::error::Result;

struct MemoryRecord {
    payload: Bytes,
    expires_at: f64,
    inserted_at: f64,
    access_count: u32,
    last_access_at: f64,
    /// Position in `order` (LRU recency / FIFO insertion order)
    order_seq: u64,
    /// Recency stamp inside `freq` (LFU tie-breaking)
    freq_seq: u64,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, MemoryRecord>,
    /// seq -> key; smallest seq is the eviction candidate for LRU/FIFO
    order: BTreeMap<u64, String>,
    /// (count, access stamp, key); smallest tuple is the LFU candidate
    freq: BTreeSet<(u32, u64, String)>,
    next_seq: u64,
}

impl MemoryState {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn detach(&mut self, key: &str) -> Option<MemoryRecord> {
        let record = self.records.remove(key)?;
        self.order.remove(&record.order_seq);
        self.freq
            .remove(&(record.access_count, record.freq_seq, key.to_string()));
        Some(record)
    }
}

/// Bounded in-process cache tier.
pub struct MemoryTier {
    state: Mutex<MemoryState>,
    policy: EvictionPolicy,
    max_size: usize,
    default_ttl: f64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

impl MemoryTier {
    pub fn new(policy: EvictionPolicy, max_size: usize, default_ttl: f64) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            policy,
            max_size: max_size.max(1),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    fn get_locked(&self, state: &mut MemoryState, key: &str) -> Option<TierEntry> {
        if !state.records.contains_key(key) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let now = unix_now();
        if state.records[key].expires_at < now {
            state.detach(key);
            self.expired.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let seq = state.bump_seq();
        let record = state.records.get_mut(key).expect("checked above");
        let old_count = record.access_count;
        let old_order_seq = record.order_seq;
        let old_freq_seq = record.freq_seq;

        record.access_count = record.access_count.saturating_add(1);
        record.last_access_at = now;
        record.freq_seq = seq;
        let new_count = record.access_count;
        if self.policy == EvictionPolicy::Lru {
            record.order_seq = seq;
        }
        let entry = TierEntry::new(record.payload.clone(), record.expires_at);

        // The frequency index tracks (count, access stamp) under every
        // policy so detach always finds the exact tuple. The recency index
        // moves only for LRU; FIFO and LFU keep insertion order.
        state.freq.remove(&(old_count, old_freq_seq, key.to_string()));
        state.freq.insert((new_count, seq, key.to_string()));
        if self.policy == EvictionPolicy::Lru {
            state.order.remove(&old_order_seq);
            state.order.insert(seq, key.to_string());
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    fn set_locked(&self, state: &mut MemoryState, key: &str, payload: Bytes, ttl: Option<f64>) {
        let now = unix_now();
        let expires_at = now + ttl.unwrap_or(self.default_ttl);

        if let Some(mut record) = state.detach(key) {
            // Re-set keeps FIFO position, refreshes LRU recency, and counts
            // as an access for LFU.
            let seq = state.bump_seq();
            record.payload = payload;
            record.expires_at = expires_at;
            record.access_count = record.access_count.saturating_add(1);
            record.last_access_at = now;
            if self.policy != EvictionPolicy::Fifo {
                record.order_seq = seq;
            }
            record.freq_seq = seq;
            state.order.insert(record.order_seq, key.to_string());
            state
                .freq
                .insert((record.access_count, record.freq_seq, key.to_string()));
            state.records.insert(key.to_string(), record);
            return;
        }

        while state.records.len() >= self.max_size {
            self.evict_one_locked(state);
        }

        let seq = state.bump_seq();
        state.order.insert(seq, key.to_string());
        state.freq.insert((1, seq, key.to_string()));
        state.records.insert(
            key.to_string(),
            MemoryRecord {
                payload,
                expires_at,
                inserted_at: now,
                access_count: 1,
                last_access_at: now,
                order_seq: seq,
                freq_seq: seq,
            },
        );
    }

    fn evict_one_locked(&self, state: &mut MemoryState) {
        let victim = match self.policy {
            EvictionPolicy::Lru | EvictionPolicy::Fifo => {
                state.order.iter().next().map(|(_, k)| k.clone())
            }
            EvictionPolicy::Lfu => state.freq.iter().next().map(|(_, _, k)| k.clone()),
        };
        if let Some(key) = victim {
            debug!(key = %key, policy = %self.policy, "evicting from memory tier");
            state.detach(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the key is present and unexpired. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        let state = self.state.lock();
        state
            .records
            .get(key)
            .is_some_and(|r| r.expires_at >= unix_now())
    }

    /// Insertion timestamp of a live entry, for tests and diagnostics.
    pub fn inserted_at(&self, key: &str) -> Option<f64> {
        self.state.lock().records.get(key).map(|r| r.inserted_at)
    }

    pub fn stats(&self) -> MemoryTierStats {
        MemoryTierStats {
            entries: self.len(),
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

/// Memory tier statistics
#[derive(Debug, Clone)]
pub struct MemoryTierStats {
    pub entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<TierEntry>> {
        let mut state = self.state.lock();
        Ok(self.get_locked(&mut state, key))
    }

    async fn set(&self, key: &str, payload: Bytes, ttl: Option<f64>) -> Result<bool> {
        let mut state = self.state.lock();
        self.set_locked(&mut state, key, payload, ttl);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock();
        Ok(state.detach(key).is_some())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, TierEntry>> {
        let mut state = self.state.lock();
        let mut found = HashMap::new();
        for key in keys {
            if let Some(entry) = self.get_locked(&mut state, key) {
                found.insert(key.clone(), entry);
            }
        }
        Ok(found)
    }

    async fn set_many(&self, entries: &HashMap<String, Bytes>, ttl: Option<f64>) -> Result<bool> {
        let mut state = self.state.lock();
        for (key, payload) in entries {
            self.set_locked(&mut state, key, payload.clone(), ttl);
        }
        Ok(true)
    }

    async fn clear(&self) -> Result<bool> {
        let mut state = self.state.lock();
        *state = MemoryState::default();
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        *state = MemoryState::default();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tier(policy: EvictionPolicy, max_size: usize) -> MemoryTier {
        MemoryTier::new(policy, max_size, 300.0)
    }

    fn payload(data: &str) -> Bytes {
        Bytes::copy_from_slice(data.as_bytes())
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let tier = make_tier(EvictionPolicy::Lru, 10);
        tier.set("k", payload("v"), None).await.unwrap();

        let entry = tier.get("k").await.unwrap().unwrap();
        assert_eq!(entry.payload, payload("v"));
        assert!(entry.remaining_ttl() > 299.0);
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let tier = make_tier(EvictionPolicy::Lru, 10);
        assert!(tier.get("absent").await.unwrap().is_none());
        assert_eq!(tier.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed_eagerly() {
        let tier = make_tier(EvictionPolicy::Lru, 10);
        tier.set("k", payload("v"), Some(-1.0)).await.unwrap();

        assert!(tier.get("k").await.unwrap().is_none());
        assert_eq!(tier.len(), 0);
        assert_eq!(tier.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_size_bound_holds() {
        let tier = make_tier(EvictionPolicy::Lru, 3);
        for i in 0..50 {
            tier.set(&format!("k{i}"), payload("v"), None).await.unwrap();
            assert!(tier.len() <= 3);
        }
        assert_eq!(tier.stats().evictions, 47);
    }

    #[tokio::test]
    async fn test_lru_trace_evicts_b() {
        // w(a), w(b), g(a), w(c) with max_size=2 evicts b.
        let tier = make_tier(EvictionPolicy::Lru, 2);
        tier.set("a", payload("1"), None).await.unwrap();
        tier.set("b", payload("2"), None).await.unwrap();
        tier.get("a").await.unwrap().unwrap();
        tier.set("c", payload("3"), None).await.unwrap();

        assert!(tier.contains("a"));
        assert!(!tier.contains("b"));
        assert!(tier.contains("c"));
    }

    #[tokio::test]
    async fn test_fifo_trace_evicts_a() {
        // Same trace under FIFO evicts a: reads never reorder.
        let tier = make_tier(EvictionPolicy::Fifo, 2);
        tier.set("a", payload("1"), None).await.unwrap();
        tier.set("b", payload("2"), None).await.unwrap();
        tier.get("a").await.unwrap().unwrap();
        tier.set("c", payload("3"), None).await.unwrap();

        assert!(!tier.contains("a"));
        assert!(tier.contains("b"));
        assert!(tier.contains("c"));
    }

    #[tokio::test]
    async fn test_lfu_trace_evicts_b() {
        // w(a), w(b), g(a), g(a), w(c) with max_size=2 evicts b.
        let tier = make_tier(EvictionPolicy::Lfu, 2);
        tier.set("a", payload("1"), None).await.unwrap();
        tier.set("b", payload("2"), None).await.unwrap();
        tier.get("a").await.unwrap().unwrap();
        tier.get("a").await.unwrap().unwrap();
        tier.set("c", payload("3"), None).await.unwrap();

        assert!(tier.contains("a"));
        assert!(!tier.contains("b"));
        assert!(tier.contains("c"));
    }

    #[tokio::test]
    async fn test_lfu_tie_broken_by_oldest_access() {
        let tier = make_tier(EvictionPolicy::Lfu, 2);
        tier.set("a", payload("1"), None).await.unwrap();
        tier.set("b", payload("2"), None).await.unwrap();
        // Equal counts; a was touched least recently.
        tier.set("c", payload("3"), None).await.unwrap();

        assert!(!tier.contains("a"));
        assert!(tier.contains("b"));
    }

    #[tokio::test]
    async fn test_replace_updates_value_and_keeps_one_entry() {
        let tier = make_tier(EvictionPolicy::Lru, 10);
        tier.set("k", payload("old"), None).await.unwrap();
        tier.set("k", payload("new"), None).await.unwrap();

        assert_eq!(tier.len(), 1);
        let entry = tier.get("k").await.unwrap().unwrap();
        assert_eq!(entry.payload, payload("new"));
    }

    #[tokio::test]
    async fn test_fifo_reset_keeps_insertion_position() {
        let tier = make_tier(EvictionPolicy::Fifo, 2);
        tier.set("a", payload("1"), None).await.unwrap();
        tier.set("b", payload("2"), None).await.unwrap();
        // Rewriting a does not move it to the back of the queue.
        tier.set("a", payload("1b"), None).await.unwrap();
        tier.set("c", payload("3"), None).await.unwrap();

        assert!(!tier.contains("a"));
        assert!(tier.contains("b"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let tier = make_tier(EvictionPolicy::Lru, 10);
        tier.set("k", payload("v"), None).await.unwrap();

        assert!(tier.delete("k").await.unwrap());
        assert!(!tier.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_operations() {
        let tier = make_tier(EvictionPolicy::Lru, 10);
        let mut entries = HashMap::new();
        entries.insert("k1".to_string(), payload("1"));
        entries.insert("k2".to_string(), payload("2"));
        tier.set_many(&entries, None).await.unwrap();

        let keys = vec!["k1".to_string(), "k2".to_string(), "k4".to_string()];
        let found = tier.get_many(&keys).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key("k1"));
        assert!(!found.contains_key("k4"));
    }

    #[tokio::test]
    async fn test_clear_and_close() {
        let tier = make_tier(EvictionPolicy::Lfu, 10);
        tier.set("k", payload("v"), None).await.unwrap();

        tier.clear().await.unwrap();
        assert!(tier.is_empty());

        tier.close().await.unwrap();
        tier.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_hit_counters() {
        let tier = make_tier(EvictionPolicy::Lru, 10);
        tier.set("k", payload("v"), None).await.unwrap();
        tier.get("k").await.unwrap();
        tier.get("k").await.unwrap();
        tier.get("absent").await.unwrap();

        let stats = tier.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let tier = Arc::new(make_tier(EvictionPolicy::Lru, 10_000));
        let mut handles = Vec::new();
        for t in 0..8 {
            let tier = Arc::clone(&tier);
            handles.push(tokio::spawn(async move {
                for i in 0..500 {
                    let key = format!("k-{t}-{i}");
                    tier.set(&key, Bytes::from_static(b"v"), None).await.unwrap();
                    assert!(tier.get(&key).await.unwrap().is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tier.len(), 4000);
    }
}
