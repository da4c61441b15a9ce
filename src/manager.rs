//! Cache engine orchestrator
//!
//! [`CacheManager`] composes an ordered stack of tiers (fastest first) behind
//! one key/value surface. Reads walk the stack top-down and promote hits into
//! every faster tier; writes go through every enabled tier in order
//! (write-through) or only the fastest. Background children (the disk
//! maintenance loop, the warmup loader, and the invalidation subscriber)
//! are owned by the engine and join on `close()`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adaptive_ttl::AdaptiveTtl;
use crate::codec::{CacheValue, Codec};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::guard::FailureGuard;
use crate::invalidation::InvalidationMessage;
use crate::namespace::{validate_key, KeyMapper};
use crate::stats::{CacheStats, ErrorCategory, LatencyTracker, Operation, StatsSnapshot};
use crate::tiers::{
    CacheTier, DiskTier, MemoryTier, SharedBackend, SharedTier, TierEntry, TierKind,
};
use crate::warmup::{save_hot_keys, WarmupLoader};

/// How long close() waits for a background task before abandoning it.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle budget for adaptive-TTL table entries between sweeps.
const ADAPTIVE_SWEEP_IDLE: f64 = 36_000.0;

/// One tier in the stack, with its failure guard when the tier's failures
/// are externally observable.
#[derive(Clone)]
struct TierHandle {
    kind: TierKind,
    tier: Arc<dyn CacheTier>,
    guard: Option<Arc<FailureGuard>>,
}

impl TierHandle {
    async fn guarded<'a, T, F, Fut>(&'a self, op: F) -> Result<T>
    where
        F: Fn() -> Fut + 'a,
        Fut: Future<Output = Result<T>> + 'a,
    {
        match &self.guard {
            Some(guard) => guard.run(op).await,
            None => op().await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<TierEntry>> {
        self.guarded(|| self.tier.get(key)).await
    }

    async fn set(&self, key: &str, payload: Bytes, ttl: Option<f64>) -> Result<bool> {
        self.guarded(|| self.tier.set(key, payload.clone(), ttl))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.guarded(|| self.tier.delete(key)).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, TierEntry>> {
        self.guarded(|| self.tier.get_many(keys)).await
    }

    async fn set_many(&self, entries: &HashMap<String, Bytes>, ttl: Option<f64>) -> Result<bool> {
        self.guarded(|| self.tier.set_many(entries, ttl)).await
    }
}

/// Multi-tier cache engine.
pub struct CacheManager {
    config: CacheConfig,
    instance_id: String,
    correlation_id: String,
    mapper: KeyMapper,
    codec: Codec,
    tiers: Vec<TierHandle>,
    memory: Option<Arc<MemoryTier>>,
    disk: Option<Arc<DiskTier>>,
    shared_backend: Option<Arc<dyn SharedBackend>>,
    adaptive: Arc<AdaptiveTtl>,
    stats: Arc<CacheStats>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl CacheManager {
    /// Build an engine from configuration, without a shared tier.
    pub async fn new(config: CacheConfig) -> Result<Self> {
        Self::with_shared_backend(config, None).await
    }

    /// Build an engine, attaching a shared-tier backend when one is given.
    pub async fn with_shared_backend(
        config: CacheConfig,
        backend: Option<Arc<dyn SharedBackend>>,
    ) -> Result<Self> {
        config.validate()?;

        let instance_id = Uuid::new_v4().simple().to_string();
        let correlation_id = format!("cm-{}", &instance_id[..8]);
        let codec = Codec::from_config(&config)?;
        let mapper = KeyMapper::new(&config.namespace);
        let adaptive = Arc::new(AdaptiveTtl::from_config(&config));
        let stats = Arc::new(CacheStats::new());

        let order = Self::tier_order(&config, backend.is_some());
        let mut tiers: Vec<TierHandle> = Vec::new();
        let mut memory = None;
        let mut disk = None;

        for kind in order {
            match kind {
                TierKind::Memory => {
                    let max_size = config
                        .cache_layers
                        .iter()
                        .find(|l| l.kind == TierKind::Memory)
                        .and_then(|l| l.max_size)
                        .unwrap_or(config.cache_max_size);
                    let tier = Arc::new(MemoryTier::new(
                        config.eviction_policy,
                        max_size,
                        config.tier_ttl(TierKind::Memory),
                    ));
                    memory = Some(Arc::clone(&tier));
                    tiers.push(TierHandle {
                        kind,
                        tier,
                        guard: None,
                    });
                }
                TierKind::Shared => {
                    let Some(backend) = backend.clone() else {
                        warn!(
                            correlation_id = %correlation_id,
                            "shared tier configured but no backend attached, skipping"
                        );
                        continue;
                    };
                    let tier = Arc::new(SharedTier::new(
                        backend,
                        &config.namespace,
                        config.tier_ttl(TierKind::Shared),
                    ));
                    tiers.push(TierHandle {
                        kind,
                        tier,
                        guard: Some(Arc::new(FailureGuard::new(
                            TierKind::Shared,
                            config.retry_attempts,
                            Duration::from_secs_f64(config.retry_delay),
                            config.failure_threshold,
                            config.breaker_cooldown,
                            Some(config.shared_tier_timeout),
                        ))),
                    });
                }
                TierKind::Disk => {
                    std::fs::create_dir_all(&config.cache_dir)?;
                    let tier = Arc::new(DiskTier::open(
                        config.disk_path(),
                        &config.namespace,
                        config.tier_ttl(TierKind::Disk),
                    )?);
                    disk = Some(Arc::clone(&tier));
                    tiers.push(TierHandle {
                        kind,
                        tier,
                        guard: Some(Arc::new(FailureGuard::new(
                            TierKind::Disk,
                            config.retry_attempts,
                            Duration::from_secs_f64(config.retry_delay),
                            config.failure_threshold,
                            config.breaker_cooldown,
                            None,
                        ))),
                    });
                }
            }
        }

        if tiers.is_empty() {
            warn!(
                correlation_id = %correlation_id,
                "no cache tiers were enabled, falling back to a memory tier"
            );
            let tier = Arc::new(MemoryTier::new(
                config.eviction_policy,
                config.cache_max_size,
                config.memory_cache_ttl,
            ));
            memory = Some(Arc::clone(&tier));
            tiers.push(TierHandle {
                kind: TierKind::Memory,
                tier,
                guard: None,
            });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manager = Self {
            instance_id,
            correlation_id,
            mapper,
            codec,
            tiers,
            memory,
            disk,
            shared_backend: backend,
            adaptive,
            stats,
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            closed: AtomicBool::new(false),
            config,
        };
        manager.spawn_children(shutdown_rx);

        info!(
            correlation_id = %manager.correlation_id,
            namespace = %manager.config.namespace,
            tiers = ?manager.tiers.iter().map(|t| t.kind).collect::<Vec<_>>(),
            eviction_policy = %manager.config.eviction_policy,
            write_through = manager.config.write_through,
            compression = manager.config.enable_compression,
            adaptive_ttl = manager.config.enable_adaptive_ttl,
            "cache engine initialized"
        );
        Ok(manager)
    }

    /// Build an engine, run `f` against it, and close on every exit path.
    pub async fn scoped<T, F, Fut>(config: CacheConfig, f: F) -> Result<T>
    where
        F: FnOnce(Arc<CacheManager>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let manager = Arc::new(Self::new(config).await?);
        let result = f(Arc::clone(&manager)).await;
        let closed = manager.close().await;
        match result {
            Ok(value) => closed.map(|_| value),
            Err(e) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "close failed after scoped error");
                }
                Err(e)
            }
        }
    }

    fn tier_order(config: &CacheConfig, has_backend: bool) -> Vec<TierKind> {
        if config.use_layered_cache {
            let mut order = Vec::new();
            for layer in config.cache_layers.iter().filter(|l| l.enabled) {
                if !order.contains(&layer.kind) {
                    order.push(layer.kind);
                }
            }
            order
        } else {
            let mut order = Vec::new();
            if config.memory_cache_enabled {
                order.push(TierKind::Memory);
            }
            if has_backend {
                order.push(TierKind::Shared);
            }
            if config.disk_cache_enabled {
                order.push(TierKind::Disk);
            }
            order
        }
    }

    fn spawn_children(&self, shutdown_rx: watch::Receiver<bool>) {
        let mut tasks = self.tasks.lock();

        if let Some(disk) = &self.disk {
            tasks.push(tokio::spawn(run_disk_maintenance(
                Arc::clone(disk),
                Arc::clone(&self.adaptive),
                MaintenanceParams {
                    check_interval: self.config.disk_check_interval,
                    compaction_interval: self.config.disk_compaction_interval,
                    usage_threshold: self.config.disk_usage_threshold,
                    critical_threshold: self.config.disk_critical_threshold,
                    retention_days: self.config.disk_retention_days,
                    aggressive_fraction: self.config.aggressive_fraction,
                },
                shutdown_rx.clone(),
            )));
        }

        if self.config.enable_warmup {
            if let Some(path) = &self.config.warmup_keys_file {
                tasks.push(tokio::spawn(run_warmup(
                    WarmupLoader::new(path),
                    self.codec.clone(),
                    self.mapper.clone(),
                    self.tiers.clone(),
                    self.config.cache_ttl,
                    self.config.write_through,
                    Arc::clone(&self.stats),
                )));
            }
        }

        if self.config.enable_invalidation {
            if let Some(backend) = &self.shared_backend {
                let local_tiers: Vec<TierHandle> = self
                    .tiers
                    .iter()
                    .filter(|t| t.kind != TierKind::Shared)
                    .cloned()
                    .collect();
                tasks.push(tokio::spawn(run_invalidation_subscriber(
                    Arc::clone(backend),
                    self.config.invalidation_channel.clone(),
                    self.instance_id.clone(),
                    self.mapper.clone(),
                    local_tiers,
                    shutdown_rx,
                )));
            }
        }
    }

    /// Unique id of this engine instance, used as the invalidation origin.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Look up a value. Returns `Ok(None)` on every non-fatal condition.
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        validate_key(key)?;
        let tracker = LatencyTracker::start();
        self.adaptive.record_access(key);
        let tier_key = self.mapper.to_tier(key);

        for (index, handle) in self.tiers.iter().enumerate() {
            let entry = match handle.get(&tier_key).await {
                Ok(entry) => entry,
                Err(e) => {
                    self.stats.record_error(ErrorCategory::TierUnavailable);
                    warn!(
                        correlation_id = %self.correlation_id,
                        tier = %handle.kind,
                        key,
                        error = %e,
                        "tier read failed, treating as miss"
                    );
                    continue;
                }
            };
            let Some(entry) = entry else { continue };

            match self.codec.decode(&entry.payload) {
                Ok(value) => {
                    self.stats.record_hit(handle.kind);
                    debug!(
                        correlation_id = %self.correlation_id,
                        tier = %handle.kind,
                        key,
                        "cache hit"
                    );
                    if self.config.read_through && index > 0 {
                        self.promote(&tier_key, &entry, index).await;
                    }
                    self.stats.record_latency(Operation::Get, tracker.elapsed());
                    return Ok(Some(value));
                }
                Err(e) => {
                    let category = match &e {
                        Error::Integrity(_) => ErrorCategory::Integrity,
                        _ => ErrorCategory::Serialization,
                    };
                    self.stats.record_error(category);
                    warn!(
                        correlation_id = %self.correlation_id,
                        tier = %handle.kind,
                        key,
                        error = %e,
                        "dropping undecodable cache entry"
                    );
                    let _ = handle.delete(&tier_key).await;
                }
            }
        }

        self.stats.record_miss();
        self.stats.record_latency(Operation::Get, tracker.elapsed());
        debug!(correlation_id = %self.correlation_id, key, "cache miss");
        Ok(None)
    }

    /// Copy a hit into every faster tier with its remaining TTL.
    async fn promote(&self, tier_key: &str, entry: &TierEntry, found_at: usize) {
        let remaining = entry.remaining_ttl();
        if remaining <= 0.0 {
            return;
        }
        let mut promoted = 0;
        for handle in &self.tiers[..found_at] {
            match handle.set(tier_key, entry.payload.clone(), Some(remaining)).await {
                Ok(true) => promoted += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    correlation_id = %self.correlation_id,
                    tier = %handle.kind,
                    key = tier_key,
                    error = %e,
                    "promotion write failed"
                ),
            }
        }
        self.stats.record_promotions(promoted);
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Store a value. Returns `Ok(false)` only when the fastest enabled tier
    /// refused the write; failures in later tiers are logged.
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
        ttl: Option<f64>,
    ) -> Result<bool> {
        validate_key(key)?;
        let tracker = LatencyTracker::start();
        self.stats.record_sets(1);

        let value = value.into();
        let payload = self.codec.encode(&value)?;
        let base = ttl.unwrap_or(self.config.cache_ttl);
        let effective_ttl = self.adaptive.effective_ttl(key, base);
        self.adaptive.record_access(key);
        let tier_key = self.mapper.to_tier(key);

        let mut success = false;
        for (index, handle) in self.tiers.iter().enumerate() {
            if index > 0 && !self.config.write_through {
                break;
            }
            match handle.set(&tier_key, payload.clone(), Some(effective_ttl)).await {
                Ok(applied) => {
                    if index == 0 {
                        success = applied;
                    }
                }
                Err(e) => {
                    self.stats.record_error(ErrorCategory::TierUnavailable);
                    warn!(
                        correlation_id = %self.correlation_id,
                        tier = %handle.kind,
                        key,
                        error = %e,
                        "tier write failed"
                    );
                }
            }
        }

        self.stats.record_latency(Operation::Set, tracker.elapsed());
        Ok(success)
    }

    // =========================================================================
    // Delete / clear
    // =========================================================================

    /// Remove a key from every enabled tier. True if any tier held it.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let tracker = LatencyTracker::start();
        let tier_key = self.mapper.to_tier(key);

        let mut deleted = false;
        for handle in &self.tiers {
            match handle.delete(&tier_key).await {
                Ok(existed) => deleted = deleted || existed,
                Err(e) => {
                    self.stats.record_error(ErrorCategory::TierUnavailable);
                    warn!(
                        correlation_id = %self.correlation_id,
                        tier = %handle.kind,
                        key,
                        error = %e,
                        "tier delete failed"
                    );
                }
            }
        }

        if deleted {
            self.stats.record_delete();
        }
        self.publish_invalidation(key).await;
        self.stats
            .record_latency(Operation::Delete, tracker.elapsed());
        Ok(deleted)
    }

    /// Clear every enabled tier in parallel. Partial failures are recorded
    /// and logged; the call itself never fails.
    pub async fn clear(&self) {
        let results = join_all(self.tiers.iter().map(|h| h.tier.clear())).await;
        for (handle, result) in self.tiers.iter().zip(results) {
            if let Err(e) = result {
                self.stats.record_error(ErrorCategory::TierUnavailable);
                error!(
                    correlation_id = %self.correlation_id,
                    tier = %handle.kind,
                    error = %e,
                    "tier clear failed"
                );
            }
        }
        self.stats.reset();
        self.publish_invalidation(crate::invalidation::CLEAR_ALL)
            .await;
    }

    // =========================================================================
    // Bulk operations
    // =========================================================================

    /// Look up many keys at once. The result holds only the found ones.
    pub async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheValue>> {
        for key in keys {
            validate_key(key)?;
        }
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let tracker = LatencyTracker::start();
        for key in keys {
            self.adaptive.record_access(key);
        }

        let mut remaining: Vec<String> = keys.iter().map(|k| self.mapper.to_tier(k)).collect();
        remaining.dedup();
        let mut found: HashMap<String, CacheValue> = HashMap::new();

        for (index, handle) in self.tiers.iter().enumerate() {
            if remaining.is_empty() {
                break;
            }
            let batch = match handle.get_many(&remaining).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.stats.record_error(ErrorCategory::TierUnavailable);
                    warn!(
                        correlation_id = %self.correlation_id,
                        tier = %handle.kind,
                        error = %e,
                        "tier bulk read failed"
                    );
                    continue;
                }
            };
            if batch.is_empty() {
                continue;
            }

            let mut promotable: HashMap<String, Bytes> = HashMap::new();
            let mut min_remaining_ttl = f64::INFINITY;
            for (tier_key, entry) in batch {
                match self.codec.decode(&entry.payload) {
                    Ok(value) => {
                        self.stats.record_hit(handle.kind);
                        remaining.retain(|k| k != &tier_key);
                        min_remaining_ttl = min_remaining_ttl.min(entry.remaining_ttl());
                        promotable.insert(tier_key.clone(), entry.payload.clone());
                        found.insert(tier_key, value);
                    }
                    Err(e) => {
                        let category = match &e {
                            Error::Integrity(_) => ErrorCategory::Integrity,
                            _ => ErrorCategory::Serialization,
                        };
                        self.stats.record_error(category);
                        warn!(
                            correlation_id = %self.correlation_id,
                            tier = %handle.kind,
                            key = %tier_key,
                            error = %e,
                            "dropping undecodable cache entry"
                        );
                        let _ = handle.delete(&tier_key).await;
                    }
                }
            }

            // One promotion batch per faster tier, bounded by the shortest
            // remaining TTL in the batch.
            if self.config.read_through
                && index > 0
                && !promotable.is_empty()
                && min_remaining_ttl > 0.0
            {
                for earlier in &self.tiers[..index] {
                    match earlier.set_many(&promotable, Some(min_remaining_ttl)).await {
                        Ok(_) => self.stats.record_promotions(promotable.len() as u64),
                        Err(e) => warn!(
                            correlation_id = %self.correlation_id,
                            tier = %earlier.kind,
                            error = %e,
                            "bulk promotion failed"
                        ),
                    }
                }
            }
        }

        for _ in &remaining {
            self.stats.record_miss();
        }
        self.stats
            .record_latency(Operation::GetMany, tracker.elapsed());
        Ok(self.mapper.from_tier_map(found))
    }

    /// Store many values at once, encoding each exactly once.
    pub async fn set_many(
        &self,
        entries: HashMap<String, CacheValue>,
        ttl: Option<f64>,
    ) -> Result<()> {
        for key in entries.keys() {
            validate_key(key)?;
        }
        if entries.is_empty() {
            return Ok(());
        }
        let tracker = LatencyTracker::start();
        self.stats.record_sets(entries.len() as u64);

        let mut payloads: HashMap<String, Bytes> = HashMap::with_capacity(entries.len());
        for (key, value) in &entries {
            payloads.insert(self.mapper.to_tier(key), self.codec.encode(value)?);
        }
        let ttl = ttl.unwrap_or(self.config.cache_ttl);

        for (index, handle) in self.tiers.iter().enumerate() {
            if index > 0 && !self.config.write_through {
                break;
            }
            if let Err(e) = handle.set_many(&payloads, Some(ttl)).await {
                self.stats.record_error(ErrorCategory::TierUnavailable);
                warn!(
                    correlation_id = %self.correlation_id,
                    tier = %handle.kind,
                    error = %e,
                    "tier bulk write failed"
                );
            }
        }

        self.stats
            .record_latency(Operation::SetMany, tracker.elapsed());
        Ok(())
    }

    // =========================================================================
    // Statistics / lifecycle
    // =========================================================================

    /// Snapshot of engine statistics, merged with tier-local counters.
    pub fn get_stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        if let Some(memory) = &self.memory {
            let tier = memory.stats();
            snapshot.memory_entries = tier.entries;
            snapshot.memory_evictions = tier.evictions;
            snapshot.memory_expired = tier.expired;
        }
        if let Some(disk) = &self.disk {
            let tier = disk.stats();
            snapshot.disk_expired = tier.expired;
            snapshot.disk_swept = tier.swept;
        }
        snapshot.adaptive_keys_tracked = self.adaptive.len();
        snapshot
    }

    /// Persist the hottest keys to the warmup file for the next start.
    pub async fn save_hot_keys(&self, limit: usize) -> Result<()> {
        let Some(path) = &self.config.warmup_keys_file else {
            return Err(Error::Config("no warmup_keys_file configured".into()));
        };
        save_hot_keys(path, &self.adaptive.hot_keys(limit)).await
    }

    /// Run one on-demand retention sweep against the disk tier.
    pub async fn run_retention_sweep(&self, aggressive: bool) -> Result<usize> {
        let Some(disk) = &self.disk else {
            return Ok(0);
        };
        disk.retention_sweep(
            aggressive,
            self.config.disk_retention_days,
            self.config.aggressive_fraction,
        )
        .await
    }

    /// Compact the disk tier file on demand.
    pub async fn compact(&self) -> Result<()> {
        match &self.disk {
            Some(disk) => disk.compact().await,
            None => Ok(()),
        }
    }

    /// Stop background children and close every tier. Idempotent; every
    /// sub-close is attempted and failures are aggregated.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(correlation_id = %self.correlation_id, "closing cache engine");

        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!(
                    correlation_id = %self.correlation_id,
                    error = %e,
                    "background task ended abnormally"
                ),
                Err(_) => warn!(
                    correlation_id = %self.correlation_id,
                    "timed out waiting for background task"
                ),
            }
        }

        let mut failures = Vec::new();
        for handle in &self.tiers {
            if let Err(e) = handle.tier.close().await {
                error!(
                    correlation_id = %self.correlation_id,
                    tier = %handle.kind,
                    error = %e,
                    "tier close failed"
                );
                failures.push(format!("{}: {e}", handle.kind));
            }
        }

        info!(correlation_id = %self.correlation_id, "cache engine closed");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::internal(
                self.correlation_id.clone(),
                format!("close failures: {}", failures.join("; ")),
            ))
        }
    }

    async fn publish_invalidation(&self, key: &str) {
        if !self.config.enable_invalidation {
            return;
        }
        let Some(backend) = &self.shared_backend else {
            return;
        };
        let message = InvalidationMessage::key(&self.instance_id, key);
        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode invalidation message");
                return;
            }
        };
        if let Err(e) = backend
            .publish(&self.config.invalidation_channel, payload)
            .await
        {
            warn!(
                correlation_id = %self.correlation_id,
                key,
                error = %e,
                "failed to publish invalidation"
            );
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(true);
            warn!(
                correlation_id = %self.correlation_id,
                "cache engine dropped without close()"
            );
        }
    }
}

// =============================================================================
// Background children
// =============================================================================

struct MaintenanceParams {
    check_interval: Duration,
    compaction_interval: Duration,
    usage_threshold: f64,
    critical_threshold: f64,
    retention_days: f64,
    aggressive_fraction: f64,
}

/// Disk maintenance loop: retention sweeps each tick (aggressive under disk
/// pressure), periodic compaction, and adaptive-TTL table aging.
async fn run_disk_maintenance(
    disk: Arc<DiskTier>,
    adaptive: Arc<AdaptiveTtl>,
    params: MaintenanceParams,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_compaction = Instant::now();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(params.check_interval) => {}
        }

        let usage = disk.disk_usage_percent();
        let aggressive = usage >= params.critical_threshold;
        if aggressive {
            warn!(
                usage = format!("{usage:.1}%"),
                threshold = format!("{:.1}%", params.critical_threshold),
                "disk usage critical, running aggressive cleanup"
            );
        } else if usage >= params.usage_threshold {
            info!(
                usage = format!("{usage:.1}%"),
                threshold = format!("{:.1}%", params.usage_threshold),
                "disk usage high, running cleanup"
            );
        }
        if let Err(e) = disk
            .retention_sweep(aggressive, params.retention_days, params.aggressive_fraction)
            .await
        {
            warn!(error = %e, "retention sweep failed");
        }

        adaptive.sweep(ADAPTIVE_SWEEP_IDLE);

        if last_compaction.elapsed() >= params.compaction_interval {
            if let Err(e) = disk.compact().await {
                warn!(error = %e, "compaction failed");
            }
            last_compaction = Instant::now();
        }
    }
    debug!("disk maintenance stopped");
}

/// Warmup pass: load seed pairs, encode once, and write them through the
/// tier stack with the default TTL. Never fatal.
async fn run_warmup(
    loader: WarmupLoader,
    codec: Codec,
    mapper: KeyMapper,
    tiers: Vec<TierHandle>,
    ttl: f64,
    write_through: bool,
    stats: Arc<CacheStats>,
) {
    let started = Instant::now();
    let (pairs, report) = match loader.load().await {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!(error = %e, "cache warmup failed");
            return;
        }
    };

    let mut payloads: HashMap<String, Bytes> = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        if validate_key(&key).is_err() {
            warn!(key, "skipping invalid warmup key");
            continue;
        }
        match codec.encode(&value) {
            Ok(payload) => {
                payloads.insert(mapper.to_tier(&key), payload);
            }
            Err(e) => warn!(key, error = %e, "skipping unencodable warmup value"),
        }
    }
    if payloads.is_empty() {
        return;
    }

    stats.record_sets(payloads.len() as u64);
    for (index, handle) in tiers.iter().enumerate() {
        if index > 0 && !write_through {
            break;
        }
        if let Err(e) = handle.set_many(&payloads, Some(ttl)).await {
            warn!(tier = %handle.kind, error = %e, "warmup write failed");
        }
    }

    info!(
        loaded = report.loaded,
        skipped = report.skipped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "cache warmup complete"
    );
}

/// Invalidation subscriber: deletes foreign-origin keys from local tiers.
async fn run_invalidation_subscriber(
    backend: Arc<dyn SharedBackend>,
    channel: String,
    instance_id: String,
    mapper: KeyMapper,
    local_tiers: Vec<TierHandle>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rx = match backend.subscribe(&channel).await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(channel, error = %e, "invalidation subscription failed");
            return;
        }
    };
    info!(channel, "invalidation subscriber started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = rx.recv() => match received {
                Ok(raw) => {
                    let message = match InvalidationMessage::from_bytes(&raw) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(error = %e, "ignoring malformed invalidation message");
                            continue;
                        }
                    };
                    if message.origin == instance_id {
                        continue;
                    }
                    if message.is_clear() {
                        debug!(origin = %message.origin, "remote clear received");
                        for handle in &local_tiers {
                            if let Err(e) = handle.tier.clear().await {
                                warn!(tier = %handle.kind, error = %e, "invalidation clear failed");
                            }
                        }
                    } else {
                        let tier_key = mapper.to_tier(&message.key);
                        debug!(origin = %message.origin, key = %message.key, "remote invalidation received");
                        for handle in &local_tiers {
                            if let Err(e) = handle.tier.delete(&tier_key).await {
                                warn!(tier = %handle.kind, error = %e, "invalidation delete failed");
                            }
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "invalidation subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!("invalidation subscriber stopped");
}

// =============================================================================
// Tests
// =============================================================================
