// SPDX-License-Identifier: MIT OR Apache-2.0
//! Nominal identifier types.
//!
//! Every identifier that crosses a module boundary is a distinct opaque
//! newtype; raw strings are rejected at the boundary instead of deep inside
//! the pipeline. Constructors validate non-emptiness and, where the format
//! declares one, the expected shape.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Errors produced when parsing an identifier from untrusted input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    /// The input was empty or all-whitespace.
    #[error("{kind} must not be empty")]
    Empty {
        /// Identifier kind that rejected the input.
        kind: &'static str,
    },
    /// The input does not match the declared shape for this identifier.
    #[error("{kind} has invalid format: {input:?}")]
    BadFormat {
        /// Identifier kind that rejected the input.
        kind: &'static str,
        /// Offending input (truncated by the caller if needed).
        input: String,
    },
}

fn require_non_empty(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.trim().is_empty() {
        Err(IdError::Empty { kind })
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Opaque per-user partitioning key handed to the core by the auth layer.
///
/// `device-*` and `ephemeral-*` prefixes mark locally-generated guest
/// identities that never went through an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a raw user identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        require_non_empty("user id", &raw)?;
        Ok(Self(raw))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for locally-generated guest identities.
    pub fn is_guest(&self) -> bool {
        self.0.starts_with("device-") || self.0.starts_with("ephemeral-")
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ImageId
// ---------------------------------------------------------------------------

/// Identifier of one captured receipt image: `{timestamp}-{filename-stem}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    /// Validate and wrap a raw image identifier.
    ///
    /// The format is `{unix-millis}-{stem}`: a non-empty run of digits, a
    /// dash, and a non-empty stem.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        require_non_empty("image id", &raw)?;
        let Some((ts, stem)) = raw.split_once('-') else {
            return Err(IdError::BadFormat {
                kind: "image id",
                input: raw,
            });
        };
        if ts.is_empty() || stem.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdError::BadFormat {
                kind: "image id",
                input: raw,
            });
        }
        Ok(Self(raw))
    }

    /// Build an image id from a capture timestamp and a filename stem.
    ///
    /// Path separators and whitespace in the stem are flattened to `_` so the
    /// id stays usable as an object-key segment.
    pub fn from_capture(timestamp_ms: i64, stem: &str) -> Self {
        let clean: String = stem
            .chars()
            .map(|c| {
                if c.is_whitespace() || c == '/' || c == '\\' {
                    '_'
                } else {
                    c
                }
            })
            .collect();
        let clean = if clean.is_empty() {
            "capture".to_string()
        } else {
            clean
        };
        Self(format!("{timestamp_ms}-{clean}"))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The capture timestamp prefix, in unix milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        self.0
            .split_once('-')
            .and_then(|(ts, _)| ts.parse().ok())
            .unwrap_or(0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// TransactionId
// ---------------------------------------------------------------------------

/// Identifier of one transaction row.
///
/// AI-created rows use ids that are a stable function of their source so
/// retried processing collapses onto the same row; manual entries get a
/// random UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Validate and wrap a raw transaction identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        require_non_empty("transaction id", &raw)?;
        Ok(Self(raw))
    }

    /// Stable id for the instant OCR path: `tx-{imageId}`.
    pub fn for_image(image: &ImageId) -> Self {
        Self(format!("tx-{image}"))
    }

    /// Stable id for the batch result path:
    /// `sha256("{jobId}#{imageId}#{timestamp}")` truncated to 24 hex chars.
    pub fn derived(job: &JobId, image: &ImageId, timestamp_ms: i64) -> Self {
        let digest = Sha256::digest(format!("{job}#{image}#{timestamp_ms}").as_bytes());
        let mut hexed = hex::encode(digest);
        hexed.truncate(24);
        Self(hexed)
    }

    /// Random id for a manually-entered transaction.
    pub fn manual() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// IntentId
// ---------------------------------------------------------------------------

/// Idempotency key attached to every side-effectful call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(String);

impl IntentId {
    /// Validate and wrap a raw intent identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        require_non_empty("intent id", &raw)?;
        Ok(Self(raw))
    }

    /// Fresh random intent (UUID v4).
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Deterministic intent for an upload of the given image.
    ///
    /// Retrying the same image therefore carries the same idempotency key.
    pub fn for_upload(image: &ImageId) -> Self {
        let digest = Sha256::digest(format!("upload:{image}").as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(Uuid::from_bytes(bytes).to_string())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// TraceId
// ---------------------------------------------------------------------------

/// Correlation id carried across every log line and request.
///
/// Chosen by the client and echoed by every server; foreign values arriving
/// in headers are accepted as long as they are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Validate and wrap a raw trace identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        require_non_empty("trace id", &raw)?;
        Ok(Self(raw))
    }

    /// Fresh random trace (UUID v4).
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Identifier assigned by the OCR vendor to a batch job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Validate and wrap a raw vendor job identifier.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        require_non_empty("job id", &raw)?;
        Ok(Self(raw))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_empty() {
        assert!(UserId::new("").is_err());
        assert!(UserId::new("   ").is_err());
    }

    #[test]
    fn user_id_guest_prefixes() {
        assert!(UserId::new("device-abc").unwrap().is_guest());
        assert!(UserId::new("ephemeral-xyz").unwrap().is_guest());
        assert!(!UserId::new("u-123").unwrap().is_guest());
    }

    #[test]
    fn image_id_requires_timestamp_prefix() {
        assert!(ImageId::new("1738000000000-receipt.jpg").is_ok());
        assert!(ImageId::new("receipt.jpg").is_err());
        assert!(ImageId::new("abc-receipt.jpg").is_err());
        assert!(ImageId::new("-receipt.jpg").is_err());
        assert!(ImageId::new("1738000000000-").is_err());
    }

    #[test]
    fn image_id_from_capture_flattens_separators() {
        let id = ImageId::from_capture(1_738_000_000_000, "my receipts/photo");
        assert_eq!(id.as_str(), "1738000000000-my_receipts_photo");
        assert_eq!(id.timestamp_ms(), 1_738_000_000_000);
    }

    #[test]
    fn transaction_id_for_image_is_stable() {
        let img = ImageId::new("1738000000000-a.jpg").unwrap();
        assert_eq!(
            TransactionId::for_image(&img),
            TransactionId::for_image(&img)
        );
        assert_eq!(
            TransactionId::for_image(&img).as_str(),
            "tx-1738000000000-a.jpg"
        );
    }

    #[test]
    fn derived_transaction_id_is_24_hex_chars() {
        let job = JobId::new("job-1").unwrap();
        let img = ImageId::new("1738000000000-a.jpg").unwrap();
        let id = TransactionId::derived(&job, &img, 1_738_000_000_000);
        assert_eq!(id.as_str().len(), 24);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
        // Deterministic under retry.
        assert_eq!(id, TransactionId::derived(&job, &img, 1_738_000_000_000));
        // Sensitive to every input.
        assert_ne!(id, TransactionId::derived(&job, &img, 1_738_000_000_001));
    }

    #[test]
    fn upload_intent_is_deterministic_per_image() {
        let a = ImageId::new("1-a.jpg").unwrap();
        let b = ImageId::new("1-b.jpg").unwrap();
        assert_eq!(IntentId::for_upload(&a), IntentId::for_upload(&a));
        assert_ne!(IntentId::for_upload(&a), IntentId::for_upload(&b));
        // Uuid-shaped.
        assert!(Uuid::parse_str(IntentId::for_upload(&a).as_str()).is_ok());
    }

    #[test]
    fn trace_id_accepts_foreign_values() {
        assert!(TraceId::new("legacy-trace-7").is_ok());
        assert!(TraceId::new("").is_err());
    }

    #[test]
    fn ids_serialize_transparently() {
        let user = UserId::new("device-abc").unwrap();
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"device-abc\"");
        let back: UserId = serde_json::from_str("\"device-abc\"").unwrap();
        assert_eq!(back, user);
    }
}
