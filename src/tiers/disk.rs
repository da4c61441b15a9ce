//! Persistent disk tier
//!
//! Disk-resident keyed store in a single file named
//! `<basename>_<namespace>.db` (`<basename>.db` for the default namespace).
//! Each entry `K` has a companion sidecar `K__expires` holding the absolute
//! expiry as unix seconds; value and sidecar are written in one transaction.
//! Reads treat a missing or exceeded sidecar as a miss and delete the entry.
//!
//! Maintenance:
//! - retention sweep removes entries past the retention horizon (normal) or
//!   a fraction of the oldest entries (aggressive, for disk pressure)
//! - compaction rewrites the store into `<name>.db.compact` and atomically
//!   renames it over the old file

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info, warn};

use super::{CacheTier, TierEntry, TierKind};
use crate::clock::unix_now;
use crate::error::{Error, Result};
use crate::namespace::KeyMapper;

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Suffix of the expiry sidecar companion key.
pub(crate) const EXPIRES_SUFFIX: &str = "__expires";

fn sidecar_key(key: &str) -> String {
    format!("{key}{EXPIRES_SUFFIX}")
}

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::unavailable("disk", e)
}

struct DiskInner {
    path: PathBuf,
    mapper: KeyMapper,
    default_ttl: f64,
    db: RwLock<Option<Database>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    swept: AtomicU64,
    compactions: AtomicU64,
}

impl DiskInner {
    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self.db.read();
        let db = guard
            .as_ref()
            .ok_or_else(|| store_err("tier is closed"))?;
        f(db)
    }

    fn read_raw(db: &Database, key: &str) -> Result<(Option<Vec<u8>>, Option<f64>)> {
        let txn = db.begin_read().map_err(store_err)?;
        let table = txn.open_table(ENTRIES).map_err(store_err)?;
        let payload = table
            .get(key)
            .map_err(store_err)?
            .map(|g| g.value().to_vec());
        let expiry = table
            .get(sidecar_key(key).as_str())
            .map_err(store_err)?
            .and_then(|g| decode_expiry(g.value()));
        Ok((payload, expiry))
    }

    fn remove_pair(db: &Database, keys: &[String]) -> Result<usize> {
        let txn = db.begin_write().map_err(store_err)?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(ENTRIES).map_err(store_err)?;
            for key in keys {
                if table.remove(key.as_str()).map_err(store_err)?.is_some() {
                    removed += 1;
                }
                table
                    .remove(sidecar_key(key).as_str())
                    .map_err(store_err)?;
            }
        }
        txn.commit().map_err(store_err)?;
        Ok(removed)
    }

    fn sync_get(&self, key: &str) -> Result<Option<TierEntry>> {
        let outcome = self.with_db(|db| {
            let (payload, expiry) = Self::read_raw(db, key)?;
            match (payload, expiry) {
                (None, _) => Ok(None),
                (Some(payload), Some(expires_at)) if expires_at >= unix_now() => {
                    Ok(Some(TierEntry::new(Bytes::from(payload), expires_at)))
                }
                // Missing or exceeded sidecar: miss, and drop the stale pair.
                (Some(_), stale) => {
                    Self::remove_pair(db, std::slice::from_ref(&key.to_string()))?;
                    if stale.is_some() {
                        self.expired.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(None)
                }
            }
        })?;
        match &outcome {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(outcome)
    }

    fn sync_set(&self, key: &str, payload: &[u8], expires_at: f64) -> Result<()> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(store_err)?;
            {
                let mut table = txn.open_table(ENTRIES).map_err(store_err)?;
                table.insert(key, payload).map_err(store_err)?;
                table
                    .insert(sidecar_key(key).as_str(), expires_at.to_le_bytes().as_slice())
                    .map_err(store_err)?;
            }
            txn.commit().map_err(store_err)?;
            Ok(())
        })
    }

    fn sync_set_many(&self, entries: &[(String, Bytes)], expires_at: f64) -> Result<()> {
        self.with_db(|db| {
            let txn = db.begin_write().map_err(store_err)?;
            {
                let mut table = txn.open_table(ENTRIES).map_err(store_err)?;
                for (key, payload) in entries {
                    table
                        .insert(key.as_str(), payload.as_ref())
                        .map_err(store_err)?;
                    table
                        .insert(sidecar_key(key).as_str(), expires_at.to_le_bytes().as_slice())
                        .map_err(store_err)?;
                }
            }
            txn.commit().map_err(store_err)?;
            Ok(())
        })
    }

    fn sync_delete(&self, key: &str) -> Result<bool> {
        self.with_db(|db| Ok(Self::remove_pair(db, std::slice::from_ref(&key.to_string()))? > 0))
    }

    fn sync_get_many(&self, keys: &[String]) -> Result<HashMap<String, TierEntry>> {
        self.with_db(|db| {
            let now = unix_now();
            let mut found = HashMap::new();
            let mut stale = Vec::new();
            {
                let txn = db.begin_read().map_err(store_err)?;
                let table = txn.open_table(ENTRIES).map_err(store_err)?;
                for key in keys {
                    let payload = table
                        .get(key.as_str())
                        .map_err(store_err)?
                        .map(|g| g.value().to_vec());
                    let Some(payload) = payload else { continue };
                    let expiry = table
                        .get(sidecar_key(key).as_str())
                        .map_err(store_err)?
                        .and_then(|g| decode_expiry(g.value()));
                    match expiry {
                        Some(expires_at) if expires_at >= now => {
                            found.insert(
                                key.clone(),
                                TierEntry::new(Bytes::from(payload), expires_at),
                            );
                        }
                        _ => stale.push(key.clone()),
                    }
                }
            }
            if !stale.is_empty() {
                self.expired
                    .fetch_add(stale.len() as u64, Ordering::Relaxed);
                Self::remove_pair(db, &stale)?;
            }
            Ok(found)
        })
    }

    /// Collect `(key, sidecar expiry)` for every non-sidecar key this
    /// namespace owns. A missing sidecar sorts first so sweeps reclaim it.
    fn collect_owned(&self, db: &Database) -> Result<Vec<(String, f64)>> {
        let txn = db.begin_read().map_err(store_err)?;
        let table = txn.open_table(ENTRIES).map_err(store_err)?;
        let mut items = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (key_guard, _) = entry.map_err(store_err)?;
            let key = key_guard.value().to_string();
            if key.ends_with(EXPIRES_SUFFIX) || !self.mapper.owns(&key) {
                continue;
            }
            let expiry = table
                .get(sidecar_key(&key).as_str())
                .map_err(store_err)?
                .and_then(|g| decode_expiry(g.value()))
                .unwrap_or(0.0);
            items.push((key, expiry));
        }
        Ok(items)
    }

    fn sync_clear(&self) -> Result<usize> {
        self.with_db(|db| {
            let keys: Vec<String> = self
                .collect_owned(db)?
                .into_iter()
                .map(|(k, _)| k)
                .collect();
            Self::remove_pair(db, &keys)
        })
    }

    fn sync_len(&self) -> Result<usize> {
        self.with_db(|db| Ok(self.collect_owned(db)?.len()))
    }

    fn sync_retention(
        &self,
        aggressive: bool,
        retention_days: f64,
        fraction: f64,
    ) -> Result<usize> {
        self.with_db(|db| {
            let mut items = self.collect_owned(db)?;
            items.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            let target = if aggressive {
                let by_fraction = (items.len() as f64 * fraction).ceil() as usize;
                by_fraction.max(10).min(items.len())
            } else {
                let horizon = unix_now() - retention_days * 24.0 * 3600.0;
                items.iter().filter(|(_, exp)| *exp < horizon).count()
            };

            let victims: Vec<String> =
                items.into_iter().take(target).map(|(k, _)| k).collect();
            if victims.is_empty() {
                return Ok(0);
            }
            let removed = Self::remove_pair(db, &victims)?;
            self.swept.fetch_add(removed as u64, Ordering::Relaxed);
            Ok(removed)
        })
    }

    /// Rewrite the store beside the old file, then swap atomically. On any
    /// failure the old file remains the live one.
    fn sync_compact(&self) -> Result<()> {
        let mut guard = self.db.write();
        let db = guard.take().ok_or_else(|| store_err("tier is closed"))?;

        let compact_path = PathBuf::from(format!("{}.compact", self.path.display()));
        let copy_result = (|| -> Result<()> {
            let _ = std::fs::remove_file(&compact_path);
            let new_db = Database::create(&compact_path).map_err(store_err)?;
            let read_txn = db.begin_read().map_err(store_err)?;
            let source = read_txn.open_table(ENTRIES).map_err(store_err)?;
            let write_txn = new_db.begin_write().map_err(store_err)?;
            {
                let mut target = write_txn.open_table(ENTRIES).map_err(store_err)?;
                for entry in source.iter().map_err(store_err)? {
                    let (key, value) = entry.map_err(store_err)?;
                    target
                        .insert(key.value(), value.value())
                        .map_err(store_err)?;
                }
            }
            write_txn.commit().map_err(store_err)?;
            Ok(())
        })();

        if let Err(e) = copy_result {
            let _ = std::fs::remove_file(&compact_path);
            *guard = Some(db);
            return Err(e);
        }

        drop(db);
        if let Err(e) = std::fs::rename(&compact_path, &self.path) {
            let _ = std::fs::remove_file(&compact_path);
            *guard = Some(Database::create(&self.path).map_err(store_err)?);
            return Err(e.into());
        }

        *guard = Some(Database::create(&self.path).map_err(store_err)?);
        self.compactions.fetch_add(1, Ordering::Relaxed);
        info!(path = %self.path.display(), "compacted disk tier");
        Ok(())
    }

    fn sync_close(&self) {
        let mut guard = self.db.write();
        *guard = None;
    }
}

fn decode_expiry(raw: &[u8]) -> Option<f64> {
    raw.try_into().ok().map(f64::from_le_bytes)
}

/// Persistent cache tier backed by a single-file keyed store.
pub struct DiskTier {
    inner: Arc<DiskInner>,
}

impl DiskTier {
    /// Open (or create) the store file for one namespace.
    pub fn open(path: impl Into<PathBuf>, namespace: &str, default_ttl: f64) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path).map_err(store_err)?;
        // Materialize the table so read transactions never race its creation.
        let txn = db.begin_write().map_err(store_err)?;
        txn.open_table(ENTRIES).map_err(store_err)?;
        txn.commit().map_err(store_err)?;

        debug!(path = %path.display(), namespace, "opened disk tier");
        Ok(Self {
            inner: Arc::new(DiskInner {
                path,
                mapper: KeyMapper::new(namespace),
                default_ttl,
                db: RwLock::new(Some(db)),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                expired: AtomicU64::new(0),
                swept: AtomicU64::new(0),
                compactions: AtomicU64::new(0),
            }),
        })
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<DiskInner>) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(inner))
            .await
            .map_err(|e| Error::internal("disk", e))?
    }

    /// Number of live (non-sidecar) entries in this namespace.
    pub async fn len(&self) -> Result<usize> {
        self.run_blocking(|inner| inner.sync_len()).await
    }

    /// Run one retention sweep, returning the number of entries removed.
    pub async fn retention_sweep(
        &self,
        aggressive: bool,
        retention_days: f64,
        fraction: f64,
    ) -> Result<usize> {
        let removed = self
            .run_blocking(move |inner| inner.sync_retention(aggressive, retention_days, fraction))
            .await?;
        if removed > 0 {
            info!(removed, aggressive, "disk retention sweep");
        }
        Ok(removed)
    }

    /// Rewrite the store file to reclaim fragmentation.
    pub async fn compact(&self) -> Result<()> {
        self.run_blocking(|inner| inner.sync_compact()).await
    }

    /// Percent of the underlying device in use.
    pub fn disk_usage_percent(&self) -> f64 {
        let probe_path = self
            .inner
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.inner.path.clone());
        match fs2::statvfs(&probe_path) {
            Ok(stats) => {
                let total = stats.total_space() as f64;
                if total <= 0.0 {
                    return 0.0;
                }
                let used = total - stats.available_space() as f64;
                (used / total * 100.0).clamp(0.0, 100.0)
            }
            Err(e) => {
                warn!(error = %e, "failed to read disk usage");
                0.0
            }
        }
    }

    pub fn stats(&self) -> DiskTierStats {
        DiskTierStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            expired: self.inner.expired.load(Ordering::Relaxed),
            swept: self.inner.swept.load(Ordering::Relaxed),
            compactions: self.inner.compactions.load(Ordering::Relaxed),
        }
    }

    /// Store file path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

/// Disk tier statistics
#[derive(Debug, Clone)]
pub struct DiskTierStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub swept: u64,
    pub compactions: u64,
}

#[async_trait]
impl CacheTier for DiskTier {
    fn kind(&self) -> TierKind {
        TierKind::Disk
    }

    async fn get(&self, key: &str) -> Result<Option<TierEntry>> {
        let key = key.to_string();
        self.run_blocking(move |inner| inner.sync_get(&key)).await
    }

    async fn set(&self, key: &str, payload: Bytes, ttl: Option<f64>) -> Result<bool> {
        let key = key.to_string();
        let default_ttl = self.inner.default_ttl;
        self.run_blocking(move |inner| {
            let expires_at = unix_now() + ttl.unwrap_or(default_ttl);
            inner.sync_set(&key, &payload, expires_at)?;
            Ok(true)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.run_blocking(move |inner| inner.sync_delete(&key)).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, TierEntry>> {
        let keys = keys.to_vec();
        self.run_blocking(move |inner| inner.sync_get_many(&keys))
            .await
    }

    async fn set_many(&self, entries: &HashMap<String, Bytes>, ttl: Option<f64>) -> Result<bool> {
        let entries: Vec<(String, Bytes)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let default_ttl = self.inner.default_ttl;
        self.run_blocking(move |inner| {
            let expires_at = unix_now() + ttl.unwrap_or(default_ttl);
            inner.sync_set_many(&entries, expires_at)?;
            Ok(true)
        })
        .await
    }

    async fn clear(&self) -> Result<bool> {
        let removed = self.run_blocking(|inner| inner.sync_clear()).await?;
        debug!(removed, "cleared disk tier namespace");
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.run_blocking(|inner| {
            inner.sync_close();
            Ok(())
        })
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================
