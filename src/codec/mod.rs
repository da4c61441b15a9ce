//! Value codec pipeline
//!
//! Transforms a [`CacheValue`] into storage bytes and back. Stages on write:
//!
//! 1. Serialize into a compact typed binary format (MessagePack)
//! 2. Compress when enabled and large enough, prepending a `'C'`/`'U'` flag
//! 3. Encrypt with a symmetric AEAD, fresh nonce per call
//! 4. Prepend a keyed MAC over the result
//!
//! Read applies the exact inverse: verify MAC, decrypt, inspect the flag,
//! decompress, deserialize. The pipeline holds only configuration and is safe
//! for concurrent use. No stage ever returns a partial value.

mod compress;
mod crypto;
mod value;

pub use compress::{Compressor, FLAG_COMPRESSED, FLAG_UNCOMPRESSED};
pub use crypto::{Encryptor, Signer};
pub use value::CacheValue;

use bytes::Bytes;

use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// The composed serialize/compress/encrypt/sign pipeline.
#[derive(Debug, Clone)]
pub struct Codec {
    compressor: Compressor,
    encryptor: Encryptor,
    signer: Signer,
}

impl Codec {
    /// Build the pipeline from engine configuration.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Ok(Self {
            compressor: Compressor::new(
                config.enable_compression,
                config.compression_min_size,
                config.compression_level,
            ),
            encryptor: Encryptor::new(
                config.enable_encryption,
                &config.encryption_key,
                &config.encryption_salt,
            )?,
            signer: Signer::new(
                config.enable_data_signing,
                &config.signing_key,
                config.signing_algorithm,
            )?,
        })
    }

    /// Plain pipeline with every optional stage disabled.
    pub fn plain() -> Self {
        Self {
            compressor: Compressor::new(false, 0, 6),
            encryptor: Encryptor::new(false, "", "").expect("disabled encryptor"),
            signer: Signer::new(false, "", Default::default()).expect("disabled signer"),
        }
    }

    /// Encode a value into its framed storage bytes.
    pub fn encode(&self, value: &CacheValue) -> Result<Bytes> {
        let body = rmp_serde::to_vec(value)
            .map_err(|e| Error::Serialization(format!("encode failed: {e}")))?;
        let framed = self.compressor.apply(&body)?;
        let sealed = self.encryptor.encrypt(&framed)?;
        Ok(Bytes::from(self.signer.sign(sealed)))
    }

    /// Decode framed storage bytes back into a value.
    ///
    /// Markers are consumed left to right, in reverse of their application
    /// order: signature, then encryption envelope, then the compression flag.
    pub fn decode(&self, data: &[u8]) -> Result<CacheValue> {
        let sealed = self.signer.verify(data)?;
        let framed = self.encryptor.decrypt(sealed)?;
        let body = self.compressor.strip(&framed)?;
        rmp_serde::from_slice(&body)
            .map_err(|e| Error::Serialization(format!("decode failed: {e}")))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SigningAlgorithm;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn sample_values() -> Vec<CacheValue> {
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), CacheValue::Int(42));
        map.insert(
            "xs".to_string(),
            CacheValue::Seq(vec![CacheValue::Int(1), CacheValue::Int(2)]),
        );
        vec![
            CacheValue::Null,
            CacheValue::Bool(true),
            CacheValue::Bool(false),
            CacheValue::Int(0),
            CacheValue::Int(i64::MIN),
            CacheValue::Int(i64::MAX),
            CacheValue::Float(0.0),
            CacheValue::Float(-1.5e300),
            CacheValue::Str(String::new()),
            CacheValue::Str("hello world".into()),
            CacheValue::Bytes(vec![]),
            CacheValue::Bytes((0..=255).collect()),
            CacheValue::Seq(vec![]),
            CacheValue::Seq(vec![CacheValue::Null, CacheValue::Str("x".into())]),
            CacheValue::Map(map),
        ]
    }

    fn config_matrix() -> Vec<CacheConfig> {
        let mut configs = Vec::new();
        for (compression, level) in [(false, 6), (true, 1), (true, 5), (true, 9)] {
            for encryption in [false, true] {
                for signing in [
                    None,
                    Some(SigningAlgorithm::Sha256),
                    Some(SigningAlgorithm::Sha384),
                    Some(SigningAlgorithm::Sha512),
                ] {
                    configs.push(CacheConfig {
                        enable_compression: compression,
                        compression_min_size: 0,
                        compression_level: level,
                        enable_encryption: encryption,
                        encryption_key: if encryption { "key".into() } else { String::new() },
                        encryption_salt: "salt".into(),
                        enable_data_signing: signing.is_some(),
                        signing_key: if signing.is_some() {
                            "sign".into()
                        } else {
                            String::new()
                        },
                        signing_algorithm: signing.unwrap_or_default(),
                        ..Default::default()
                    });
                }
            }
        }
        configs
    }

    #[test]
    fn test_roundtrip_full_matrix() {
        for config in config_matrix() {
            let codec = Codec::from_config(&config).unwrap();
            for value in sample_values() {
                let encoded = codec.encode(&value).unwrap();
                let decoded = codec.decode(&encoded).unwrap();
                assert_eq!(decoded, value);
            }
        }
    }

    #[test]
    fn test_flag_byte_position() {
        let codec = Codec::plain();
        let encoded = codec.encode(&CacheValue::Int(7)).unwrap();
        assert_eq!(encoded[0], FLAG_UNCOMPRESSED);
    }

    #[test]
    fn test_signed_payload_starts_with_mac() {
        let config = CacheConfig {
            enable_data_signing: true,
            signing_key: "sign".into(),
            signing_algorithm: SigningAlgorithm::Sha256,
            ..Default::default()
        };
        let codec = Codec::from_config(&config).unwrap();
        let encoded = codec.encode(&CacheValue::Int(7)).unwrap();
        // MAC(32) + flag + msgpack int
        assert_eq!(encoded[32], FLAG_UNCOMPRESSED);
    }

    #[test]
    fn test_tampered_signed_payload_is_integrity_error() {
        let config = CacheConfig {
            enable_data_signing: true,
            signing_key: "sign".into(),
            ..Default::default()
        };
        let codec = Codec::from_config(&config).unwrap();
        let encoded = codec.encode(&CacheValue::Str("value".into())).unwrap();

        for i in 0..encoded.len() {
            let mut copy = encoded.to_vec();
            copy[i] ^= 0x01;
            assert!(
                matches!(codec.decode(&copy), Err(Error::Integrity(_))),
                "byte {i}"
            );
        }
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let codec = Codec::plain();
        assert!(matches!(
            codec.decode(&[FLAG_UNCOMPRESSED, 0xc1, 0xc1, 0xc1]),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_decode_requires_matching_encryption_config() {
        let encrypted = Codec::from_config(&CacheConfig {
            enable_encryption: true,
            encryption_key: "key".into(),
            ..Default::default()
        })
        .unwrap();
        let encoded = encrypted.encode(&CacheValue::Int(7)).unwrap();

        // Plain codec sees the nonce byte as an unknown flag or garbage.
        assert!(Codec::plain().decode(&encoded).is_err());
    }

    fn arb_value() -> impl Strategy<Value = CacheValue> {
        let leaf = prop_oneof![
            Just(CacheValue::Null),
            any::<bool>().prop_map(CacheValue::Bool),
            any::<i64>().prop_map(CacheValue::Int),
            any::<f64>()
                .prop_filter("NaN breaks PartialEq", |f| !f.is_nan())
                .prop_map(CacheValue::Float),
            ".{0,32}".prop_map(CacheValue::Str),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(CacheValue::Bytes),
        ];
        leaf.prop_recursive(3, 32, 8, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..8).prop_map(CacheValue::Seq),
                proptest::collection::btree_map(".{0,8}", inner, 0..8).prop_map(CacheValue::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_roundtrip_plain(value in arb_value()) {
            let codec = Codec::plain();
            let encoded = codec.encode(&value).unwrap();
            prop_assert_eq!(codec.decode(&encoded).unwrap(), value);
        }

        #[test]
        fn prop_roundtrip_compressed_signed(value in arb_value()) {
            let config = CacheConfig {
                enable_compression: true,
                compression_min_size: 0,
                enable_data_signing: true,
                signing_key: "sign".into(),
                ..Default::default()
            };
            let codec = Codec::from_config(&config).unwrap();
            let encoded = codec.encode(&value).unwrap();
            prop_assert_eq!(codec.decode(&encoded).unwrap(), value);
        }
    }
}
