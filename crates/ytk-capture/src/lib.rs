// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capture-side concerns: the document-scanner state machine and the
//! compression policy applied before upload.
//!
//! The corner-detection and pixel-pushing algorithms live in an external
//! library; this crate owns the lifecycle around them — which states the
//! scanner may occupy, when a candidate quadrilateral is trustworthy, and
//! whether a blob is worth re-encoding at all.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod compress;
pub mod scanner;

pub use compress::{
    CompressError, CompressionOutcome, CompressionStats, Compressor, PassthroughCompressor,
    compress_blob, WEBP_MAX_DIMENSION, WEBP_QUALITY,
};
pub use scanner::{
    Point, Quad, ScanError, ScanPhase, ScanResult, Scanner, SCAN_OUTPUT_LONG_EDGE,
    SCAN_OUTPUT_QUALITY,
};
