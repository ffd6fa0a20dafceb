//! Lazily-compressed policy payloads.
//!
//! Policy sources are written far more often than they are read back (the
//! compiled form lives elsewhere), so payloads are compressed at write time
//! and only inflated when something actually materializes the bytes —
//! typically a `get_policy` call or a trigger event. The first read caches
//! the inflated bytes for subsequent reads.

use std::io::{Read, Write};
use std::sync::{Arc, OnceLock};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use poldb_error::{Result, StoreError};

/// How the stored bytes are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    /// Stored verbatim (compression did not pay off).
    Plain,
    /// Zlib-deflated.
    Zlib,
}

/// An opaque byte payload, compressed at rest and inflated on demand.
#[derive(Debug, Clone)]
pub struct LazyBlob {
    encoding: Encoding,
    stored: Arc<[u8]>,
    raw_len: usize,
    inflated: OnceLock<Arc<[u8]>>,
}

impl LazyBlob {
    /// Compress and store `raw`. Falls back to storing the bytes verbatim
    /// when deflate does not shrink them (tiny or incompressible inputs).
    #[must_use]
    pub fn new(raw: &[u8]) -> Self {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2 + 16), Compression::default());
        let compressed = encoder
            .write_all(raw)
            .and_then(|()| encoder.finish())
            .ok()
            .filter(|c| c.len() < raw.len());

        match compressed {
            Some(c) => Self {
                encoding: Encoding::Zlib,
                stored: c.into(),
                raw_len: raw.len(),
                inflated: OnceLock::new(),
            },
            None => Self {
                encoding: Encoding::Plain,
                stored: raw.into(),
                raw_len: raw.len(),
                inflated: OnceLock::new(),
            },
        }
    }

    /// The original (uncompressed) payload length.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// The at-rest payload length.
    #[must_use]
    pub fn stored_len(&self) -> usize {
        self.stored.len()
    }

    /// Whether the payload is held compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.encoding == Encoding::Zlib
    }

    /// Materialize the payload, inflating on first use and caching the
    /// result for subsequent reads.
    pub fn get(&self) -> Result<Arc<[u8]>> {
        match self.encoding {
            Encoding::Plain => Ok(Arc::clone(&self.stored)),
            Encoding::Zlib => {
                if let Some(cached) = self.inflated.get() {
                    return Ok(Arc::clone(cached));
                }
                let mut out = Vec::with_capacity(self.raw_len);
                ZlibDecoder::new(&self.stored[..])
                    .read_to_end(&mut out)
                    .map_err(|e| StoreError::internal(format!("policy inflate failed: {e}")))?;
                let out: Arc<[u8]> = out.into();
                Ok(Arc::clone(self.inflated.get_or_init(|| out)))
            }
        }
    }
}

impl From<&[u8]> for LazyBlob {
    fn from(raw: &[u8]) -> Self {
        Self::new(raw)
    }
}
