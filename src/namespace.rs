//! Namespaced cache keys
//!
//! Maps logical keys to tier-local keys and back. The reserved namespace
//! `"default"` is the identity mapping; every other namespace prefixes keys
//! as `"<namespace>:<key>"`. Scan-like operations (`clear`, retention sweeps)
//! use the same mapper to enumerate only their own namespace's entries.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Longest accepted key, in bytes.
pub const MAX_KEY_LEN: usize = 512;

/// Reserved namespace with identity key mapping.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Validate a logical key: non-empty, bounded length, no control characters.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Key("key cannot be empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::Key(format!(
            "key length {} exceeds maximum {MAX_KEY_LEN}",
            key.len()
        )));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(Error::Key("key contains control characters".into()));
    }
    Ok(())
}

/// Maps logical keys to tier-local keys for one namespace.
#[derive(Debug, Clone)]
pub struct KeyMapper {
    namespace: String,
}

impl KeyMapper {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn is_default(&self) -> bool {
        self.namespace == DEFAULT_NAMESPACE
    }

    /// Map a logical key to its tier-local form.
    pub fn to_tier(&self, key: &str) -> String {
        if self.is_default() {
            key.to_string()
        } else {
            format!("{}:{key}", self.namespace)
        }
    }

    /// Reverse-map a tier-local key to its logical form.
    pub fn from_tier<'a>(&self, tier_key: &'a str) -> &'a str {
        if self.is_default() {
            return tier_key;
        }
        tier_key
            .strip_prefix(&self.namespace)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(tier_key)
    }

    /// True if a tier-local key belongs to this namespace. Used by scans.
    pub fn owns(&self, tier_key: &str) -> bool {
        if self.is_default() {
            return true;
        }
        tier_key
            .strip_prefix(&self.namespace)
            .is_some_and(|rest| rest.starts_with(':'))
    }

    /// Map every key in a map to its tier-local form.
    pub fn to_tier_map<V>(&self, entries: HashMap<String, V>) -> HashMap<String, V> {
        if self.is_default() {
            return entries;
        }
        entries
            .into_iter()
            .map(|(k, v)| (self.to_tier(&k), v))
            .collect()
    }

    /// Reverse-map every key in a map to its logical form.
    pub fn from_tier_map<V>(&self, entries: HashMap<String, V>) -> HashMap<String, V> {
        if self.is_default() {
            return entries;
        }
        entries
            .into_iter()
            .map(|(k, v)| (self.from_tier(&k).to_string(), v))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespace_is_identity() {
        let mapper = KeyMapper::new("default");
        assert_eq!(mapper.to_tier("user:1"), "user:1");
        assert_eq!(mapper.from_tier("user:1"), "user:1");
        assert!(mapper.owns("anything"));
    }

    #[test]
    fn test_custom_namespace_prefixes() {
        let mapper = KeyMapper::new("sessions");
        assert_eq!(mapper.to_tier("abc"), "sessions:abc");
        assert_eq!(mapper.from_tier("sessions:abc"), "abc");
    }

    #[test]
    fn test_roundtrip_with_colons_in_key() {
        let mapper = KeyMapper::new("ns");
        let tier_key = mapper.to_tier("a:b:c");
        assert_eq!(tier_key, "ns:a:b:c");
        assert_eq!(mapper.from_tier(&tier_key), "a:b:c");
    }

    #[test]
    fn test_owns_requires_exact_prefix() {
        let mapper = KeyMapper::new("ns");
        assert!(mapper.owns("ns:key"));
        assert!(!mapper.owns("ns2:key"));
        assert!(!mapper.owns("nskey"));
        assert!(!mapper.owns("other:key"));
    }

    #[test]
    fn test_from_tier_leaves_foreign_keys() {
        let mapper = KeyMapper::new("ns");
        assert_eq!(mapper.from_tier("other:key"), "other:key");
    }

    #[test]
    fn test_validate_key_rejects_empty() {
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_validate_key_rejects_too_long() {
        let key = "x".repeat(MAX_KEY_LEN + 1);
        assert!(validate_key(&key).is_err());
        let key = "x".repeat(MAX_KEY_LEN);
        assert!(validate_key(&key).is_ok());
    }

    #[test]
    fn test_validate_key_rejects_control_chars() {
        assert!(validate_key("a\nb").is_err());
        assert!(validate_key("a\tb").is_err());
        assert!(validate_key("a\0b").is_err());
        assert!(validate_key("normal-key.1").is_ok());
    }

    #[test]
    fn test_tier_map_roundtrip() {
        let mapper = KeyMapper::new("ns");
        let mut entries = HashMap::new();
        entries.insert("k1".to_string(), 1);
        entries.insert("k2".to_string(), 2);

        let namespaced = mapper.to_tier_map(entries);
        assert!(namespaced.contains_key("ns:k1"));

        let logical = mapper.from_tier_map(namespaced);
        assert!(logical.contains_key("k1"));
        assert!(logical.contains_key("k2"));
    }
}
