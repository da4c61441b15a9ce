//! Engine statistics
//!
//! Lock-free counters incremented on every operation, plus per-operation
//! latency tracking with an exponential moving average. `snapshot()` returns
//! a point-in-time copy for the public stats accessor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::tiers::TierKind;

/// Error categories tracked by the statistics record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Serialization,
    Integrity,
    TierUnavailable,
    Internal,
}

/// Operations with tracked latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Set,
    Delete,
    GetMany,
    SetMany,
}

/// Lock-free statistics collector.
#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    shared_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    promotions: AtomicU64,

    serialization_errors: AtomicU64,
    integrity_errors: AtomicU64,
    unavailable_errors: AtomicU64,
    internal_errors: AtomicU64,

    get_latency_us: AtomicU64,
    set_latency_us: AtomicU64,
    delete_latency_us: AtomicU64,
    get_many_latency_us: AtomicU64,
    set_many_latency_us: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, tier: TierKind) {
        match tier {
            TierKind::Memory => self.memory_hits.fetch_add(1, Ordering::Relaxed),
            TierKind::Shared => self.shared_hits.fetch_add(1, Ordering::Relaxed),
            TierKind::Disk => self.disk_hits.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sets(&self, count: u64) {
        self.sets.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotions(&self, count: u64) {
        self.promotions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self, category: ErrorCategory) {
        match category {
            ErrorCategory::Serialization => {
                self.serialization_errors.fetch_add(1, Ordering::Relaxed)
            }
            ErrorCategory::Integrity => self.integrity_errors.fetch_add(1, Ordering::Relaxed),
            ErrorCategory::TierUnavailable => {
                self.unavailable_errors.fetch_add(1, Ordering::Relaxed)
            }
            ErrorCategory::Internal => self.internal_errors.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_latency(&self, operation: Operation, elapsed: Duration) {
        let target = match operation {
            Operation::Get => &self.get_latency_us,
            Operation::Set => &self.set_latency_us,
            Operation::Delete => &self.delete_latency_us,
            Operation::GetMany => &self.get_many_latency_us,
            Operation::SetMany => &self.set_many_latency_us,
        };
        Self::update_latency_ema(target, elapsed);
    }

    fn update_latency_ema(target: &AtomicU64, elapsed: Duration) {
        let new_us = elapsed.as_micros() as u64;
        let alpha = 0.1;

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
            + self.shared_hits.load(Ordering::Relaxed)
            + self.disk_hits.load(Ordering::Relaxed)
    }

    pub fn tier_hits(&self, tier: TierKind) -> u64 {
        match tier {
            TierKind::Memory => self.memory_hits.load(Ordering::Relaxed),
            TierKind::Shared => self.shared_hits.load(Ordering::Relaxed),
            TierKind::Disk => self.disk_hits.load(Ordering::Relaxed),
        }
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn errors(&self, category: ErrorCategory) -> u64 {
        match category {
            ErrorCategory::Serialization => self.serialization_errors.load(Ordering::Relaxed),
            ErrorCategory::Integrity => self.integrity_errors.load(Ordering::Relaxed),
            ErrorCategory::TierUnavailable => self.unavailable_errors.load(Ordering::Relaxed),
            ErrorCategory::Internal => self.internal_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.memory_hits,
            &self.shared_hits,
            &self.disk_hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.promotions,
            &self.serialization_errors,
            &self.integrity_errors,
            &self.unavailable_errors,
            &self.internal_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            serialization_errors: self.serialization_errors.load(Ordering::Relaxed),
            integrity_errors: self.integrity_errors.load(Ordering::Relaxed),
            unavailable_errors: self.unavailable_errors.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            get_latency: Duration::from_micros(self.get_latency_us.load(Ordering::Relaxed)),
            set_latency: Duration::from_micros(self.set_latency_us.load(Ordering::Relaxed)),
            delete_latency: Duration::from_micros(self.delete_latency_us.load(Ordering::Relaxed)),
            get_many_latency: Duration::from_micros(
                self.get_many_latency_us.load(Ordering::Relaxed),
            ),
            set_many_latency: Duration::from_micros(
                self.set_many_latency_us.load(Ordering::Relaxed),
            ),
            memory_entries: 0,
            memory_evictions: 0,
            memory_expired: 0,
            disk_expired: 0,
            disk_swept: 0,
            adaptive_keys_tracked: 0,
        }
    }
}

/// Snapshot of engine statistics, as returned by the public accessor.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub memory_hits: u64,
    pub shared_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub promotions: u64,
    pub hit_rate: f64,

    pub serialization_errors: u64,
    pub integrity_errors: u64,
    pub unavailable_errors: u64,
    pub internal_errors: u64,

    pub get_latency: Duration,
    pub set_latency: Duration,
    pub delete_latency: Duration,
    pub get_many_latency: Duration,
    pub set_many_latency: Duration,

    // Filled in by the engine from tier-local counters.
    pub memory_entries: usize,
    pub memory_evictions: u64,
    pub memory_expired: u64,
    pub disk_expired: u64,
    pub disk_swept: u64,
    pub adaptive_keys_tracked: usize,
}

impl StatsSnapshot {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.shared_hits + self.disk_hits
    }

    /// Total expirations observed across tiers.
    pub fn expired(&self) -> u64 {
        self.memory_expired + self.disk_expired
    }

    pub fn errors_total(&self) -> u64 {
        self.serialization_errors
            + self.integrity_errors
            + self.unavailable_errors
            + self.internal_errors
    }
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
