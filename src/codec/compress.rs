//! Payload compression
//!
//! zlib compression with a minimum-size gate. The first framed byte is a
//! flag: `b'C'` for a compressed body, `b'U'` for an uncompressed one. The
//! flag is always present so decode never has to guess.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{Error, Result};

/// Flag byte for a compressed body.
pub const FLAG_COMPRESSED: u8 = b'C';
/// Flag byte for an uncompressed body.
pub const FLAG_UNCOMPRESSED: u8 = b'U';

/// zlib compressor with a size gate.
#[derive(Debug, Clone)]
pub struct Compressor {
    enabled: bool,
    min_size: usize,
    level: u32,
}

impl Compressor {
    pub fn new(enabled: bool, min_size: usize, level: u32) -> Self {
        Self {
            enabled,
            min_size,
            level,
        }
    }

    /// Frame a serialized body: compress when enabled and large enough,
    /// prepend the flag byte either way.
    pub fn apply(&self, body: &[u8]) -> Result<Vec<u8>> {
        if self.enabled && body.len() >= self.min_size {
            let mut encoder =
                ZlibEncoder::new(Vec::with_capacity(body.len() / 2 + 1), flate2::Compression::new(self.level));
            encoder
                .write_all(body)
                .and_then(|_| encoder.finish())
                .map(|compressed| {
                    let mut framed = Vec::with_capacity(compressed.len() + 1);
                    framed.push(FLAG_COMPRESSED);
                    framed.extend_from_slice(&compressed);
                    framed
                })
                .map_err(|e| Error::Serialization(format!("compression failed: {e}")))
        } else {
            let mut framed = Vec::with_capacity(body.len() + 1);
            framed.push(FLAG_UNCOMPRESSED);
            framed.extend_from_slice(body);
            Ok(framed)
        }
    }

    /// Inverse of [`apply`]: inspect the flag and decompress if needed.
    /// Handles both flags regardless of the enabled setting, so entries
    /// written under a different configuration still decode.
    pub fn strip(&self, framed: &[u8]) -> Result<Vec<u8>> {
        let (flag, body) = framed
            .split_first()
            .ok_or_else(|| Error::Serialization("empty framed payload".into()))?;
        match *flag {
            FLAG_UNCOMPRESSED => Ok(body.to_vec()),
            FLAG_COMPRESSED => {
                let mut decoder = ZlibDecoder::new(body);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| Error::Serialization(format!("decompression failed: {e}")))?;
                Ok(out)
            }
            other => Err(Error::Serialization(format!(
                "unknown compression flag: 0x{other:02x}"
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
