//! Payload encryption and signing
//!
//! [`Encryptor`] wraps the framed body in an AEAD envelope: a fresh random
//! 96-bit nonce followed by the ciphertext. The key is derived
//! deterministically from `(encryption_key, encryption_salt)` with PBKDF2 so
//! the same configuration decrypts across restarts. [`Signer`] prepends a
//! keyed MAC over everything that follows it.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Sha256, Sha384, Sha512};

use crate::config::SigningAlgorithm;
use crate::error::{Error, Result};

/// PBKDF2 rounds for key derivation.
const KDF_ITERATIONS: u32 = 100_000;

/// AEAD nonce length in bytes.
const NONCE_LEN: usize = 12;

// =============================================================================
// Encryptor
// =============================================================================

/// Symmetric AEAD encryption for framed payloads.
#[derive(Clone)]
pub struct Encryptor {
    cipher: Option<ChaCha20Poly1305>,
}

impl Encryptor {
    /// Build from configuration. A disabled encryptor passes data through.
    pub fn new(enabled: bool, secret: &str, salt: &str) -> Result<Self> {
        if !enabled {
            return Ok(Self { cipher: None });
        }
        if secret.is_empty() {
            return Err(Error::Config(
                "encryption enabled but encryption_key is empty".into(),
            ));
        }
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt.as_bytes(), KDF_ITERATIONS, &mut key);
        Ok(Self {
            cipher: Some(ChaCha20Poly1305::new(Key::from_slice(&key))),
        })
    }

    pub fn enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt with a fresh random nonce stored in the envelope.
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let Some(cipher) = &self.cipher else {
            return Ok(plain.to_vec());
        };
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plain)
            .map_err(|_| Error::Internal {
                correlation_id: "codec".into(),
                message: "AEAD encryption failed".into(),
            })?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open the envelope. Rejection is an integrity error.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let Some(cipher) = &self.cipher else {
            return Ok(data.to_vec());
        };
        if data.len() < NONCE_LEN {
            return Err(Error::Integrity("ciphertext shorter than nonce".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Integrity("AEAD rejected ciphertext".into()))
    }
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("enabled", &self.enabled())
            .finish()
    }
}

// =============================================================================
// Signer
// =============================================================================

/// Keyed MAC over the payload, prepended so verification runs first on read.
#[derive(Clone)]
pub struct Signer {
    key: Option<Vec<u8>>,
    algorithm: SigningAlgorithm,
}

impl Signer {
    /// Build from configuration. A disabled signer passes data through.
    pub fn new(enabled: bool, secret: &str, algorithm: SigningAlgorithm) -> Result<Self> {
        if !enabled {
            return Ok(Self {
                key: None,
                algorithm,
            });
        }
        if secret.is_empty() {
            return Err(Error::Config(
                "data signing enabled but signing_key is empty".into(),
            ));
        }
        Ok(Self {
            key: Some(secret.as_bytes().to_vec()),
            algorithm,
        })
    }

    pub fn enabled(&self) -> bool {
        self.key.is_some()
    }

    fn mac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self.algorithm {
            SigningAlgorithm::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            SigningAlgorithm::Sha384 => {
                let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            SigningAlgorithm::Sha512 => {
                let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Prepend the MAC over `data`.
    pub fn sign(&self, data: Vec<u8>) -> Vec<u8> {
        let Some(key) = &self.key else {
            return data;
        };
        let tag = self.mac(key, &data);
        let mut out = Vec::with_capacity(tag.len() + data.len());
        out.extend_from_slice(&tag);
        out.extend_from_slice(&data);
        out
    }

    /// Verify and strip the MAC. Constant-time comparison via the MAC itself.
    pub fn verify<'a>(&self, signed: &'a [u8]) -> Result<&'a [u8]> {
        let Some(key) = &self.key else {
            return Ok(signed);
        };
        let mac_len = self.algorithm.mac_len();
        if signed.len() < mac_len {
            return Err(Error::Integrity("payload shorter than its MAC".into()));
        }
        let (tag, data) = signed.split_at(mac_len);
        let verified = match self.algorithm {
            SigningAlgorithm::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
                mac.update(data);
                mac.verify_slice(tag).is_ok()
            }
            SigningAlgorithm::Sha384 => {
                let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
                mac.update(data);
                mac.verify_slice(tag).is_ok()
            }
            SigningAlgorithm::Sha512 => {
                let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
                mac.update(data);
                mac.verify_slice(tag).is_ok()
            }
        };
        if !verified {
            return Err(Error::Integrity(
                "signature verification failed: payload may be tampered with".into(),
            ));
        }
        Ok(data)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("enabled", &self.enabled())
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
