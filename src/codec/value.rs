//! Typed payload model
//!
//! [`CacheValue`] is the boundary type for everything the engine stores:
//! primitives, ordered sequences, string-keyed maps, and raw bytes. The codec
//! round-trips these exactly; anything else is unrepresentable by
//! construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An encodable cache payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    #[serde(with = "serde_bytes")]
    Bytes(Vec<u8>),
    Seq(Vec<CacheValue>),
    Map(BTreeMap<String, CacheValue>),
}

impl CacheValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CacheValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CacheValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CacheValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            CacheValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[CacheValue]> {
        match self {
            CacheValue::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, CacheValue>> {
        match self {
            CacheValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<bool> for CacheValue {
    fn from(b: bool) -> Self {
        CacheValue::Bool(b)
    }
}

impl From<i32> for CacheValue {
    fn from(n: i32) -> Self {
        CacheValue::Int(n as i64)
    }
}

impl From<i64> for CacheValue {
    fn from(n: i64) -> Self {
        CacheValue::Int(n)
    }
}

impl From<f64> for CacheValue {
    fn from(f: f64) -> Self {
        CacheValue::Float(f)
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> Self {
        CacheValue::Str(s.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(s: String) -> Self {
        CacheValue::Str(s)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(b: Vec<u8>) -> Self {
        CacheValue::Bytes(b)
    }
}

impl From<Vec<CacheValue>> for CacheValue {
    fn from(items: Vec<CacheValue>) -> Self {
        CacheValue::Seq(items)
    }
}

impl From<BTreeMap<String, CacheValue>> for CacheValue {
    fn from(map: BTreeMap<String, CacheValue>) -> Self {
        CacheValue::Map(map)
    }
}

impl<T: Into<CacheValue>> From<Option<T>> for CacheValue {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => CacheValue::Null,
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
    fn test_from_conversions() {
        assert_eq!(CacheValue::from(true), CacheValue::Bool(true));
        assert_eq!(CacheValue::from(42i64), CacheValue::Int(42));
        assert_eq!(CacheValue::from(7i32), CacheValue::Int(7));
        assert_eq!(CacheValue::from(1.5), CacheValue::Float(1.5));
        assert_eq!(
            CacheValue::from("hello"),
            CacheValue::Str("hello".to_string())
        );
        assert_eq!(
            CacheValue::from(vec![1u8, 2, 3]),
            CacheValue::Bytes(vec![1, 2, 3])
        );
        assert_eq!(CacheValue::from(None::<i64>), CacheValue::Null);
    }

    #[test]
    fn test_accessors() {
        assert!(CacheValue::Null.is_null());
        assert_eq!(CacheValue::Bool(true).as_bool(), Some(true));
        assert_eq!(CacheValue::Int(5).as_int(), Some(5));
        assert_eq!(CacheValue::Int(5).as_str(), None);
        assert_eq!(CacheValue::Str("x".into()).as_str(), Some("x"));
        assert_eq!(CacheValue::Float(2.0).as_float(), Some(2.0));
        assert_eq!(
            CacheValue::Bytes(vec![9]).as_bytes(),
            Some([9u8].as_slice())
        );
    }

    #[test]
    fn test_nested_composition() {
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), CacheValue::Int(42));
        map.insert(
            "xs".to_string(),
            CacheValue::Seq(vec![CacheValue::Int(1), CacheValue::Int(2)]),
        );
        let value = CacheValue::Map(map);

        let inner = value.as_map().unwrap();
        assert_eq!(inner["n"].as_int(), Some(42));
        assert_eq!(inner["xs"].as_seq().unwrap().len(), 2);
    }
}
