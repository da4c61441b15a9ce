//! Cache warmup
//!
//! Seeds the cache from a JSON file at startup. The file is either an object
//! mapping keys to values or a list of `{"key": ..., "value": ...}` records.
//! Warmup problems are logged and never fatal: a malformed record is skipped,
//! a missing file loads nothing.

use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::codec::CacheValue;
use crate::error::{Error, Result};

/// Outcome of one warmup pass.
#[derive(Debug, Clone, Default)]
pub struct WarmupReport {
    pub total: usize,
    pub loaded: usize,
    pub skipped: usize,
}

/// Loads seed entries from a JSON file.
pub struct WarmupLoader {
    path: PathBuf,
}

impl WarmupLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse the file into key/value pairs, skipping malformed records.
    pub async fn load(&self) -> Result<(Vec<(String, CacheValue)>, WarmupReport)> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let parsed: JsonValue = serde_json::from_str(&raw)
            .map_err(|e| Error::Serialization(format!("warmup file is not valid JSON: {e}")))?;

        let mut report = WarmupReport::default();
        let mut pairs = Vec::new();

        match parsed {
            JsonValue::Object(map) => {
                // A `{"keys": [...]}` hot-key snapshot carries no values.
                if map.get("keys").is_some_and(JsonValue::is_array) {
                    info!(path = %self.path.display(), "warmup file lists keys only, nothing to load");
                    return Ok((pairs, report));
                }
                report.total = map.len();
                for (key, value) in map {
                    pairs.push((key, json_to_value(value)));
                    report.loaded += 1;
                }
            }
            JsonValue::Array(items) => {
                report.total = items.len();
                for item in items {
                    let JsonValue::Object(mut record) = item else {
                        report.skipped += 1;
                        continue;
                    };
                    let (Some(JsonValue::String(key)), Some(value)) =
                        (record.remove("key"), record.remove("value"))
                    else {
                        warn!("skipping malformed warmup record");
                        report.skipped += 1;
                        continue;
                    };
                    pairs.push((key, json_to_value(value)));
                    report.loaded += 1;
                }
            }
            other => {
                return Err(Error::Serialization(format!(
                    "unexpected warmup file shape: {}",
                    json_kind(&other)
                )));
            }
        }

        Ok((pairs, report))
    }
}

/// Persist the hottest keys for a future warmup pass.
pub async fn save_hot_keys(path: &Path, keys: &[(String, u64)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let names: Vec<&str> = keys.iter().map(|(k, _)| k.as_str()).collect();
    let snapshot = serde_json::json!({
        "keys": names,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": names.len(),
    });
    let body = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    tokio::fs::write(path, body).await?;
    info!(path = %path.display(), count = names.len(), "saved hot keys");
    Ok(())
}

fn json_to_value(json: JsonValue) -> CacheValue {
    match json {
        JsonValue::Null => CacheValue::Null,
        JsonValue::Bool(b) => CacheValue::Bool(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CacheValue::Int(i)
            } else {
                CacheValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => CacheValue::Str(s),
        JsonValue::Array(items) => CacheValue::Seq(items.into_iter().map(json_to_value).collect()),
        JsonValue::Object(map) => CacheValue::Map(
            map.into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_file(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_load_object_format() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "warm.json", r#"{"a": 1, "b": "two"}"#).await;

        let (pairs, report) = WarmupLoader::new(path).load().await.unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 0);

        let a = pairs.iter().find(|(k, _)| k == "a").unwrap();
        assert_eq!(a.1, CacheValue::Int(1));
        let b = pairs.iter().find(|(k, _)| k == "b").unwrap();
        assert_eq!(b.1, CacheValue::Str("two".into()));
    }

    #[tokio::test]
    async fn test_load_record_list_format() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "warm.json",
            r#"[{"key": "a", "value": [1, 2]}, {"not": "a record"}, 5]"#,
        )
        .await;

        let (pairs, report) = WarmupLoader::new(path).load().await.unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(
            pairs[0].1,
            CacheValue::Seq(vec![CacheValue::Int(1), CacheValue::Int(2)])
        );
    }

    #[tokio::test]
    async fn test_keys_only_snapshot_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "warm.json", r#"{"keys": ["a", "b"]}"#).await;

        let (pairs, report) = WarmupLoader::new(path).load().await.unwrap();
        assert!(pairs.is_empty());
        assert_eq!(report.loaded, 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let loader = WarmupLoader::new("/nonexistent/warm.json");
        assert!(matches!(loader.load().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_scalar_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "warm.json", "42").await;
        assert!(matches!(
            WarmupLoader::new(path).load().await,
            Err(Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_nested_json_conversion() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "warm.json",
            r#"{"k": {"n": 42, "f": 1.5, "xs": [true, null]}}"#,
        )
        .await;

        let (pairs, _) = WarmupLoader::new(path).load().await.unwrap();
        let map = pairs[0].1.as_map().unwrap();
        assert_eq!(map["n"].as_int(), Some(42));
        assert_eq!(map["f"].as_float(), Some(1.5));
        assert_eq!(
            map["xs"].as_seq().unwrap(),
            [CacheValue::Bool(true), CacheValue::Null].as_slice()
        );
    }

    #[tokio::test]
    async fn test_save_hot_keys_roundtrips_as_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hot.json");

        save_hot_keys(&path, &[("a".into(), 10), ("b".into(), 5)])
            .await
            .unwrap();

        let (pairs, report) = WarmupLoader::new(&path).load().await.unwrap();
        assert!(pairs.is_empty());
        assert_eq!(report.total, 0);

        let raw: JsonValue =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(raw["count"], 2);
    }
}
