// SPDX-License-Identifier: MIT OR Apache-2.0
//! Compression policy applied before upload.
//!
//! The actual WebP re-encode is an external primitive behind the
//! [`Compressor`] capability; this module owns the decision of whether to
//! invoke it at all and the bookkeeping around the outcome.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use ytk_core::COMPRESSION_THRESHOLD_BYTES;

/// WebP quality used for upload re-encoding.
pub const WEBP_QUALITY: u8 = 80;

/// Maximum output dimension (long edge) for upload re-encoding.
pub const WEBP_MAX_DIMENSION: u32 = 2_048;

/// Errors from the compression primitive.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    /// The input could not be decoded as an image.
    #[error("input is not a decodable image: {0}")]
    UndecodableInput(String),
    /// The encoder itself failed.
    #[error("webp encode failed: {0}")]
    EncodeFailed(String),
}

/// Re-encodes a blob to WebP at [`WEBP_QUALITY`] with its long edge capped
/// at [`WEBP_MAX_DIMENSION`].
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Produce the re-encoded blob.
    async fn compress(&self, blob: &[u8]) -> Result<Vec<u8>, CompressError>;
}

/// Outcome of running the policy over one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionOutcome {
    /// The bytes to upload.
    pub bytes: Vec<u8>,
    /// Size of the input.
    pub original_size: u64,
    /// Size of `bytes`.
    pub compressed_size: u64,
    /// `true` when the input was small enough to pass through unchanged.
    pub skipped: bool,
}

/// Apply the compression policy: inputs at or below the threshold pass
/// through untouched, larger inputs are re-encoded.
pub async fn compress_blob(
    compressor: &dyn Compressor,
    blob: Vec<u8>,
) -> Result<CompressionOutcome, CompressError> {
    let original_size = blob.len() as u64;
    if original_size <= COMPRESSION_THRESHOLD_BYTES {
        return Ok(CompressionOutcome {
            compressed_size: original_size,
            bytes: blob,
            original_size,
            skipped: true,
        });
    }
    let out = compressor.compress(&blob).await?;
    Ok(CompressionOutcome {
        original_size,
        compressed_size: out.len() as u64,
        bytes: out,
        skipped: false,
    })
}

/// Identity [`Compressor`] for tests and mock mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCompressor;

#[async_trait]
impl Compressor for PassthroughCompressor {
    async fn compress(&self, blob: &[u8]) -> Result<Vec<u8>, CompressError> {
        Ok(blob.to_vec())
    }
}

// ---------------------------------------------------------------------------
// CompressionStats
// ---------------------------------------------------------------------------

/// Cumulative compression bookkeeping. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct CompressionStats {
    inner: Arc<Mutex<StatsInner>>,
}

#[derive(Debug, Default)]
struct StatsInner {
    blobs: u64,
    skipped: u64,
    bytes_in: u64,
    bytes_out: u64,
}

impl CompressionStats {
    /// New zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outcome.
    pub fn record(&self, outcome: &CompressionOutcome) {
        let mut guard = self.inner.lock().expect("stats lock poisoned");
        guard.blobs += 1;
        if outcome.skipped {
            guard.skipped += 1;
        }
        guard.bytes_in += outcome.original_size;
        guard.bytes_out += outcome.compressed_size;
    }

    /// Number of blobs seen.
    pub fn blobs(&self) -> u64 {
        self.inner.lock().expect("stats lock poisoned").blobs
    }

    /// Number of blobs that bypassed re-encoding.
    pub fn skipped(&self) -> u64 {
        self.inner.lock().expect("stats lock poisoned").skipped
    }

    /// Output bytes over input bytes; `1.0` when nothing was seen.
    pub fn ratio(&self) -> f64 {
        let guard = self.inner.lock().expect("stats lock poisoned");
        if guard.bytes_in == 0 {
            1.0
        } else {
            guard.bytes_out as f64 / guard.bytes_in as f64
        }
    }
}
