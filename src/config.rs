//! Engine configuration
//!
//! Every recognized option with its default. Construction-time validation is
//! fatal: an invalid configuration is rejected with [`Error::Config`] before
//! any tier is built.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tiers::TierKind;

/// Eviction discipline for the memory tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used
    #[default]
    Lru,
    /// Insertion order, reads do not reorder
    Fifo,
    /// Least frequently used, ties broken by oldest access
    Lfu,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::Fifo => write!(f, "fifo"),
            EvictionPolicy::Lfu => write!(f, "lfu"),
        }
    }
}

/// Hash algorithm for payload signing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl SigningAlgorithm {
    /// Length in bytes of the MAC this algorithm produces.
    pub fn mac_len(&self) -> usize {
        match self {
            SigningAlgorithm::Sha256 => 32,
            SigningAlgorithm::Sha384 => 48,
            SigningAlgorithm::Sha512 => 64,
        }
    }
}

impl std::fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningAlgorithm::Sha256 => write!(f, "sha256"),
            SigningAlgorithm::Sha384 => write!(f, "sha384"),
            SigningAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

/// One entry of the explicit `cache_layers` ordering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLayerConfig {
    /// Which tier this layer refers to
    pub kind: TierKind,
    /// Default TTL for entries written through this layer, in seconds
    pub ttl: f64,
    /// Disabled layers are skipped entirely
    pub enabled: bool,
    /// Relative weight, reserved for shard routing composed on top
    pub weight: u32,
    /// Optional per-layer entry bound (memory tier only)
    pub max_size: Option<usize>,
}

impl TierLayerConfig {
    pub fn new(kind: TierKind, ttl: f64) -> Self {
        Self {
            kind,
            ttl,
            enabled: true,
            weight: 1,
            max_size: None,
        }
    }
}

/// Cache engine configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory for persistent tier files
    pub cache_dir: PathBuf,
    /// Base filename for the persistent tier
    pub cache_file: String,
    /// Maximum number of entries in the memory tier (and the adaptive-TTL table)
    pub cache_max_size: usize,
    /// Default TTL in seconds when no override is given
    pub cache_ttl: f64,
    /// Eviction discipline for the memory tier
    pub eviction_policy: EvictionPolicy,
    /// Key namespace; `"default"` maps keys through unchanged
    pub namespace: String,

    /// Enable the in-process memory tier
    pub memory_cache_enabled: bool,
    /// Default TTL for the memory tier
    pub memory_cache_ttl: f64,
    /// Enable the persistent disk tier
    pub disk_cache_enabled: bool,
    /// Default TTL for the disk tier
    pub disk_cache_ttl: f64,

    /// Use the explicit `cache_layers` ordering instead of the default assembly
    pub use_layered_cache: bool,
    /// Ordered tier list (fastest first) for layered mode
    pub cache_layers: Vec<TierLayerConfig>,
    /// Writes go to every enabled tier in order; otherwise only the fastest
    pub write_through: bool,
    /// Read hits in slower tiers are promoted to the faster ones
    pub read_through: bool,

    /// Compress serialized values above `compression_min_size`
    pub enable_compression: bool,
    /// Minimum serialized size in bytes before compression is applied
    pub compression_min_size: usize,
    /// zlib compression level, 1-9
    pub compression_level: u32,

    /// Disk usage percent that triggers a normal retention sweep
    pub disk_usage_threshold: f64,
    /// Disk usage percent that triggers an aggressive sweep
    pub disk_critical_threshold: f64,
    /// Retention horizon in days for the normal sweep
    pub disk_retention_days: f64,
    /// Fraction of entries removed by an aggressive sweep
    pub aggressive_fraction: f64,
    /// Interval between disk monitor ticks
    pub disk_check_interval: Duration,
    /// Interval between compaction passes
    pub disk_compaction_interval: Duration,

    /// Retry attempts for guarded tier operations
    pub retry_attempts: u32,
    /// Base retry delay in seconds, doubled per attempt
    pub retry_delay: f64,
    /// Consecutive failures before a tier's circuit opens
    pub failure_threshold: u32,
    /// Cooldown before an open circuit admits a probe
    pub breaker_cooldown: Duration,
    /// Per-call timeout for the shared tier
    pub shared_tier_timeout: Duration,

    /// Adjust effective TTL from per-key access statistics
    pub enable_adaptive_ttl: bool,
    /// Lower clamp for the effective TTL
    pub adaptive_ttl_min: f64,
    /// Upper clamp for the effective TTL
    pub adaptive_ttl_max: f64,
    /// Accesses before a key is considered hot
    pub access_count_threshold: u64,
    /// Multiplier applied per doubling past the threshold
    pub adaptive_ttl_adjustment_factor: f64,

    /// Encrypt payloads with an AEAD
    pub enable_encryption: bool,
    /// Secret for key derivation; must be non-empty when encryption is on
    pub encryption_key: String,
    /// Salt for key derivation
    pub encryption_salt: String,
    /// Prepend a keyed MAC to payloads
    pub enable_data_signing: bool,
    /// Secret for the MAC; must be non-empty when signing is on
    pub signing_key: String,
    /// MAC algorithm
    pub signing_algorithm: SigningAlgorithm,

    /// Seed entries from `warmup_keys_file` at start
    pub enable_warmup: bool,
    /// JSON file with key/value pairs to preload
    pub warmup_keys_file: Option<PathBuf>,

    /// Propagate deletes across instances through the shared tier
    pub enable_invalidation: bool,
    /// Pub/sub channel for invalidation messages
    pub invalidation_channel: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".cache"),
            cache_file: "cache.db".to_string(),
            cache_max_size: 5000,
            cache_ttl: 300.0,
            eviction_policy: EvictionPolicy::Lru,
            namespace: "default".to_string(),

            memory_cache_enabled: true,
            memory_cache_ttl: 300.0,
            disk_cache_enabled: true,
            disk_cache_ttl: 3600.0,

            use_layered_cache: false,
            cache_layers: Vec::new(),
            write_through: true,
            read_through: true,

            enable_compression: false,
            compression_min_size: 1024,
            compression_level: 6,

            disk_usage_threshold: 75.0,
            disk_critical_threshold: 90.0,
            disk_retention_days: 7.0,
            aggressive_fraction: 0.5,
            disk_check_interval: Duration::from_secs(60),
            disk_compaction_interval: Duration::from_secs(3600),

            retry_attempts: 3,
            retry_delay: 2.0,
            failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(60),
            shared_tier_timeout: Duration::from_secs(5),

            enable_adaptive_ttl: false,
            adaptive_ttl_min: 30.0,
            adaptive_ttl_max: 3600.0,
            access_count_threshold: 10,
            adaptive_ttl_adjustment_factor: 1.5,

            enable_encryption: false,
            encryption_key: String::new(),
            encryption_salt: String::new(),
            enable_data_signing: false,
            signing_key: String::new(),
            signing_algorithm: SigningAlgorithm::Sha256,

            enable_warmup: false,
            warmup_keys_file: None,

            enable_invalidation: false,
            invalidation_channel: "cache:invalidation".to_string(),
        }
    }
}

impl CacheConfig {
    /// Validate the configuration. Invalid settings are fatal at construction.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("namespace cannot be empty".into()));
        }
        if self.namespace.contains(':') {
            return Err(Error::Config(format!(
                "namespace must not contain ':': {}",
                self.namespace
            )));
        }
        if self.cache_max_size == 0 {
            return Err(Error::Config("cache_max_size must be at least 1".into()));
        }
        if self.cache_ttl <= 0.0 {
            return Err(Error::Config("cache_ttl must be positive".into()));
        }
        if !(1..=9).contains(&self.compression_level) {
            return Err(Error::Config(format!(
                "compression_level must be in 1..=9, got {}",
                self.compression_level
            )));
        }
        if !(0.0..=100.0).contains(&self.disk_usage_threshold)
            || !(0.0..=100.0).contains(&self.disk_critical_threshold)
        {
            return Err(Error::Config(
                "disk thresholds must be percentages in 0..=100".into(),
            ));
        }
        if self.disk_usage_threshold > self.disk_critical_threshold {
            return Err(Error::Config(
                "disk_usage_threshold must not exceed disk_critical_threshold".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.aggressive_fraction) {
            return Err(Error::Config(
                "aggressive_fraction must be a fraction in 0..=1".into(),
            ));
        }
        if !self.retry_delay.is_finite() || self.retry_delay < 0.0 {
            return Err(Error::Config(
                "retry_delay must be a non-negative number of seconds".into(),
            ));
        }
        if self.enable_adaptive_ttl {
            if self.adaptive_ttl_min <= 0.0 || self.adaptive_ttl_max < self.adaptive_ttl_min {
                return Err(Error::Config(
                    "adaptive TTL bounds must satisfy 0 < min <= max".into(),
                ));
            }
            if self.access_count_threshold == 0 {
                return Err(Error::Config(
                    "access_count_threshold must be at least 1".into(),
                ));
            }
            if self.adaptive_ttl_adjustment_factor < 1.0 {
                return Err(Error::Config(
                    "adaptive_ttl_adjustment_factor must be >= 1.0".into(),
                ));
            }
        }
        if self.enable_encryption && self.encryption_key.is_empty() {
            return Err(Error::Config(
                "enable_encryption requires a non-empty encryption_key".into(),
            ));
        }
        if self.enable_data_signing && self.signing_key.is_empty() {
            return Err(Error::Config(
                "enable_data_signing requires a non-empty signing_key".into(),
            ));
        }
        if self.enable_warmup && self.warmup_keys_file.is_none() {
            return Err(Error::Config(
                "enable_warmup requires warmup_keys_file".into(),
            ));
        }
        if self.use_layered_cache && self.cache_layers.iter().all(|l| !l.enabled) {
            return Err(Error::Config(
                "use_layered_cache requires at least one enabled layer".into(),
            ));
        }
        Ok(())
    }

    /// Path of the persistent tier file: `<cache_dir>/<basename>_<namespace>.db`,
    /// or `<cache_dir>/<basename>.db` for the default namespace.
    pub fn disk_path(&self) -> PathBuf {
        let stem = Path::new(&self.cache_file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("cache");
        let name = if self.namespace == "default" {
            format!("{stem}.db")
        } else {
            format!("{stem}_{}.db", self.namespace)
        };
        self.cache_dir.join(name)
    }

    /// Default TTL for a tier kind, honoring layered overrides.
    pub fn tier_ttl(&self, kind: TierKind) -> f64 {
        if self.use_layered_cache {
            if let Some(layer) = self.cache_layers.iter().find(|l| l.kind == kind) {
                return layer.ttl;
            }
        }
        match kind {
            TierKind::Memory => self.memory_cache_ttl,
            TierKind::Disk => self.disk_cache_ttl,
            TierKind::Shared => self.cache_ttl,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.eviction_policy, EvictionPolicy::Lru);
        assert_eq!(config.namespace, "default");
        assert!(config.write_through);
    }

    #[test]
    fn test_disk_path_default_namespace() {
        let config = CacheConfig {
            cache_dir: PathBuf::from("/tmp/cache"),
            ..Default::default()
        };
        assert_eq!(config.disk_path(), PathBuf::from("/tmp/cache/cache.db"));
    }

    #[test]
    fn test_disk_path_custom_namespace() {
        let config = CacheConfig {
            cache_dir: PathBuf::from("/tmp/cache"),
            namespace: "sessions".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.disk_path(),
            PathBuf::from("/tmp/cache/cache_sessions.db")
        );
    }

    #[test]
    fn test_invalid_compression_level() {
        let config = CacheConfig {
            compression_level: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CacheConfig {
            compression_level: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_encryption_requires_key() {
        let config = CacheConfig {
            enable_encryption: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CacheConfig {
            enable_encryption: true,
            encryption_key: "secret".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_signing_requires_key() {
        let config = CacheConfig {
            enable_data_signing: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_namespace_validation() {
        let config = CacheConfig {
            namespace: "a:b".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CacheConfig {
            namespace: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_layered_requires_enabled_layer() {
        let config = CacheConfig {
            use_layered_cache: true,
            cache_layers: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tier_ttl_layered_override() {
        let mut layer = TierLayerConfig::new(TierKind::Memory, 42.0);
        layer.max_size = Some(10);
        let config = CacheConfig {
            use_layered_cache: true,
            cache_layers: vec![layer],
            ..Default::default()
        };
        assert_eq!(config.tier_ttl(TierKind::Memory), 42.0);
        assert_eq!(config.tier_ttl(TierKind::Disk), config.disk_cache_ttl);
    }

    #[test]
    fn test_signing_algorithm_mac_len() {
        assert_eq!(SigningAlgorithm::Sha256.mac_len(), 32);
        assert_eq!(SigningAlgorithm::Sha384.mac_len(), 48);
        assert_eq!(SigningAlgorithm::Sha512.mac_len(), 64);
    }

    #[test]
    fn test_eviction_policy_display() {
        assert_eq!(EvictionPolicy::Lru.to_string(), "lru");
        assert_eq!(EvictionPolicy::Fifo.to_string(), "fifo");
        assert_eq!(EvictionPolicy::Lfu.to_string(), "lfu");
    }
}
