//! Adaptive TTL
//!
//! Tracks per-key access statistics in a bounded table and stretches the
//! effective TTL of hot keys on write. The contract is monotonic: more
//! accesses never shorten the effective TTL. For a key past the access
//! threshold the effective TTL is
//!
//! ```text
//! eff = clamp(base * factor^k, min, max)
//! k   = floor(log2(access_count / threshold))
//! ```
//!
//! The table is aged by a time-based sweep that decays counts and drops
//! idle entries, so it follows recent patterns instead of all-time totals.

use dashmap::DashMap;
use tracing::debug;

use crate::clock::unix_now;
use crate::config::CacheConfig;

/// Multiplier applied to access counts on each sweep.
const DECAY_FACTOR: f64 = 0.9;

#[derive(Debug, Clone)]
struct AccessStat {
    count: u64,
    first_seen: f64,
    last_access: f64,
}

/// Per-key access tracking and effective-TTL computation.
pub struct AdaptiveTtl {
    enabled: bool,
    min_ttl: f64,
    max_ttl: f64,
    threshold: u64,
    factor: f64,
    max_entries: usize,
    table: DashMap<String, AccessStat>,
}

impl AdaptiveTtl {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enable_adaptive_ttl,
            min_ttl: config.adaptive_ttl_min,
            max_ttl: config.adaptive_ttl_max,
            threshold: config.access_count_threshold.max(1),
            factor: config.adaptive_ttl_adjustment_factor,
            max_entries: config.cache_max_size,
            table: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Record one access to a key.
    pub fn record_access(&self, key: &str) {
        if !self.enabled {
            return;
        }
        let now = unix_now();
        if let Some(mut stat) = self.table.get_mut(key) {
            stat.count += 1;
            stat.last_access = now;
            return;
        }
        if self.table.len() >= self.max_entries {
            self.drop_stalest();
        }
        self.table.insert(
            key.to_string(),
            AccessStat {
                count: 1,
                first_seen: now,
                last_access: now,
            },
        );
    }

    /// Access count currently recorded for a key.
    pub fn access_count(&self, key: &str) -> u64 {
        self.table.get(key).map(|s| s.count).unwrap_or(0)
    }

    /// Effective TTL for a key about to be written.
    pub fn effective_ttl(&self, key: &str, base: f64) -> f64 {
        if !self.enabled {
            return base;
        }
        let count = self.access_count(key);
        if count < self.threshold {
            return base;
        }
        let doublings = ((count as f64) / (self.threshold as f64)).log2().floor();
        let eff = base * self.factor.powi(doublings as i32);
        eff.clamp(self.min_ttl, self.max_ttl)
    }

    /// Decay counts and drop entries idle longer than `max_idle` seconds.
    pub fn sweep(&self, max_idle: f64) {
        if !self.enabled {
            return;
        }
        let now = unix_now();
        self.table.retain(|_, stat| {
            stat.count = ((stat.count as f64 * DECAY_FACTOR) as u64).max(1);
            now - stat.last_access <= max_idle
        });
        debug!(tracked = self.table.len(), "adaptive TTL sweep");
    }

    /// Hottest keys by access count, for warmup snapshots.
    pub fn hot_keys(&self, limit: usize) -> Vec<(String, u64)> {
        let mut keys: Vec<(String, u64)> = self
            .table
            .iter()
            .map(|e| (e.key().clone(), e.value().count))
            .collect();
        keys.sort_by(|a, b| b.1.cmp(&a.1));
        keys.truncate(limit);
        keys
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn drop_stalest(&self) {
        let stalest = self
            .table
            .iter()
            .min_by(|a, b| {
                a.value()
                    .last_access
                    .partial_cmp(&b.value().last_access)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|e| e.key().clone());
        if let Some(key) = stalest {
            self.table.remove(&key);
        }
    }

    #[cfg(test)]
    fn force_count(&self, key: &str, count: u64) {
        let now = unix_now();
        self.table.insert(
            key.to_string(),
            AccessStat {
                count,
                first_seen: now,
                last_access: now,
            },
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_adaptive(threshold: u64, factor: f64, min: f64, max: f64) -> AdaptiveTtl {
        AdaptiveTtl::from_config(&CacheConfig {
            enable_adaptive_ttl: true,
            access_count_threshold: threshold,
            adaptive_ttl_adjustment_factor: factor,
            adaptive_ttl_min: min,
            adaptive_ttl_max: max,
            cache_max_size: 100,
            ..Default::default()
        })
    }

    #[test]
    fn test_disabled_returns_base() {
        let adaptive = AdaptiveTtl::from_config(&CacheConfig::default());
        assert!(!adaptive.enabled());
        adaptive.record_access("k");
        assert_eq!(adaptive.effective_ttl("k", 300.0), 300.0);
        assert_eq!(adaptive.len(), 0);
    }

    #[test]
    fn test_below_threshold_returns_base() {
        let adaptive = make_adaptive(10, 1.5, 30.0, 3600.0);
        for _ in 0..9 {
            adaptive.record_access("k");
        }
        assert_eq!(adaptive.effective_ttl("k", 300.0), 300.0);
    }

    #[test]
    fn test_at_threshold_stays_at_base_clamped() {
        let adaptive = make_adaptive(10, 1.5, 30.0, 3600.0);
        adaptive.force_count("k", 10);
        // k = floor(log2(1)) = 0, factor^0 = 1
        assert_eq!(adaptive.effective_ttl("k", 300.0), 300.0);
    }

    #[test]
    fn test_doubling_raises_ttl() {
        let adaptive = make_adaptive(10, 1.5, 30.0, 3600.0);
        adaptive.force_count("k", 20);
        // k = 1
        assert_eq!(adaptive.effective_ttl("k", 300.0), 450.0);

        adaptive.force_count("k", 40);
        // k = 2
        assert_eq!(adaptive.effective_ttl("k", 300.0), 675.0);
    }

    #[test]
    fn test_clamped_to_max() {
        let adaptive = make_adaptive(10, 2.0, 30.0, 1000.0);
        adaptive.force_count("k", 10_000);
        assert_eq!(adaptive.effective_ttl("k", 300.0), 1000.0);
    }

    #[test]
    fn test_monotonic_in_access_count() {
        let adaptive = make_adaptive(5, 1.5, 30.0, 3600.0);
        let mut previous = 0.0;
        for count in 1..500 {
            adaptive.force_count("k", count);
            let eff = adaptive.effective_ttl("k", 120.0);
            assert!(
                eff >= previous,
                "ttl decreased at count {count}: {eff} < {previous}"
            );
            previous = eff;
        }
    }

    #[test]
    fn test_table_is_bounded() {
        let adaptive = make_adaptive(10, 1.5, 30.0, 3600.0);
        for i in 0..500 {
            adaptive.record_access(&format!("k{i}"));
        }
        assert!(adaptive.len() <= 100);
    }

    #[test]
    fn test_sweep_drops_idle_entries() {
        let adaptive = make_adaptive(10, 1.5, 30.0, 3600.0);
        adaptive.record_access("k");
        adaptive.sweep(0.0);
        // last_access is "now"; a zero idle budget still keeps entries touched
        // this instant, so force an old timestamp instead.
        assert!(adaptive.len() <= 1);

        if let Some(mut stat) = adaptive.table.get_mut("k") {
            stat.last_access -= 100.0;
        }
        adaptive.sweep(50.0);
        assert!(adaptive.is_empty());
    }

    #[test]
    fn test_sweep_decays_counts() {
        let adaptive = make_adaptive(10, 1.5, 30.0, 3600.0);
        adaptive.force_count("k", 100);
        adaptive.sweep(3600.0);
        assert_eq!(adaptive.access_count("k"), 90);
    }

    #[test]
    fn test_hot_keys_sorted_by_count() {
        let adaptive = make_adaptive(10, 1.5, 30.0, 3600.0);
        adaptive.force_count("cold", 1);
        adaptive.force_count("warm", 10);
        adaptive.force_count("hot", 100);

        let hot = adaptive.hot_keys(2);
        assert_eq!(hot.len(), 2);
        assert_eq!(hot[0].0, "hot");
        assert_eq!(hot[1].0, "warm");
    }
}
