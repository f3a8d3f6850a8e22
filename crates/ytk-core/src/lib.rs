// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared identifiers, data model, and error taxonomy for Yorutsuke.
//!
//! Everything in this crate is a leaf: no I/O, no clocks, no network. The
//! ingestion pipeline, sync engine, and cloud handlers all speak in these
//! types.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod error;
pub mod id;
pub mod image;
pub mod money;
pub mod tier;
pub mod transaction;

pub use batch::{BatchJob, BatchJobStatus};
pub use error::{CoreError, ErrorKind, TransportError};
pub use id::{ImageId, IntentId, JobId, TraceId, TransactionId, UserId};
pub use image::{ContentDigest, ImageStatus, ReceiptImage};
pub use money::{Currency, Money};
pub use tier::Tier;
pub use transaction::{Category, Transaction, TransactionStatus, TransactionType};

/// Wire-contract version reported by the gateway health endpoint.
pub const CONTRACT_VERSION: &str = "1.0.0";

/// Maximum number of retries before an upload is left in `failed`.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Backoff schedule for upload retries, indexed by the retry count.
pub const RETRY_DELAYS_MS: [u64; 3] = [1_000, 2_000, 4_000];

/// Inputs at or below this size bypass re-encoding entirely.
pub const COMPRESSION_THRESHOLD_BYTES: u64 = 102_400;

/// Lifetime of a presigned upload URL.
pub const PRESIGN_URL_TTL_SECS: u64 = 30 * 60;

/// Client-side deadline for a single blob PUT.
pub const UPLOAD_TIMEOUT_SECS: u64 = 60;

/// Client-side deadline for an OCR batch submission.
pub const OCR_SUBMIT_TIMEOUT_SECS: u64 = 10;

/// Client-side deadline for a single sync round-trip.
pub const SYNC_TIMEOUT_SECS: u64 = 10;

/// Upper bound on records in a single batch manifest.
pub const MANIFEST_MAX_RECORDS: usize = 1_000;

/// Transaction writes are flushed in chunks of this size.
pub const RESULT_WRITE_CHUNK: usize = 25;

/// Daily usage counters older than this many days are pruned.
pub const DAILY_USAGE_RETENTION_DAYS: i64 = 7;

/// A sync is considered stale after this many seconds without success.
pub const AUTO_SYNC_STALE_SECS: i64 = 5 * 60;

/// Minimum image count for a batch OCR submission.
pub const MIN_BATCH_IMAGES: usize = 100;

/// Batch job records expire after this many days.
pub const BATCH_JOB_TTL_DAYS: i64 = 7;

/// Guest-tier rows carry a TTL of this many days.
pub const GUEST_DATA_TTL_DAYS: i64 = 30;
