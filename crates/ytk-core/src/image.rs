// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt image rows and their lifecycle state machine.

use crate::error::ErrorKind;
use crate::id::{ImageId, TraceId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ---------------------------------------------------------------------------
// ImageStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a captured receipt image.
///
/// The pipeline is monotone: `pending → compressed → uploading → uploaded →
/// processing → processed → confirmed`, with `failed` and `skipped` as
/// branches. Transitions not listed by [`valid_transitions`]
/// (ImageStatus::valid_transitions) are forbidden and refused by the
/// repository layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Captured, not yet compressed.
    Pending,
    /// Compressed blob ready for upload.
    Compressed,
    /// A PUT is in flight.
    Uploading,
    /// The object landed in cloud storage.
    Uploaded,
    /// OCR is running (instant or batch).
    Processing,
    /// A transaction row exists for this image.
    Processed,
    /// The user confirmed the extracted transaction. Terminal.
    Confirmed,
    /// Gave up; see the row's error fields. Retriable back to `pending`.
    Failed,
    /// Dropped as a duplicate of an already-uploaded image. Terminal.
    Skipped,
}

impl ImageStatus {
    /// The set of statuses that are valid successors of `self`.
    ///
    /// `Uploading → Compressed` is the restart demotion: an in-flight upload
    /// the process did not finish is rewound on recovery.
    pub fn valid_transitions(&self) -> &'static [ImageStatus] {
        match self {
            Self::Pending => &[Self::Compressed, Self::Failed, Self::Skipped],
            Self::Compressed => &[Self::Uploading, Self::Failed, Self::Skipped],
            Self::Uploading => &[Self::Uploaded, Self::Failed, Self::Compressed],
            Self::Uploaded => &[Self::Processing, Self::Failed],
            Self::Processing => &[Self::Processed, Self::Failed],
            Self::Processed => &[Self::Confirmed],
            Self::Failed => &[Self::Pending],
            Self::Confirmed | Self::Skipped => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is valid.
    pub fn can_transition_to(&self, next: ImageStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Returns `true` for terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Skipped)
    }

    /// Returns `true` once the image occupies cloud storage — the states in
    /// which a duplicate capture must be skipped rather than re-uploaded.
    pub fn occupies_remote(&self) -> bool {
        matches!(
            self,
            Self::Uploaded | Self::Processing | Self::Processed | Self::Confirmed
        )
    }

    /// Stable string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Compressed => "compressed",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// 16-byte content digest used for per-user duplicate detection.
///
/// Computed as SHA-256 truncated to 16 bytes; serialised as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 16]);

impl ContentDigest {
    /// Digest a blob.
    pub fn of(data: &[u8]) -> Self {
        let full = Sha256::digest(data);
        let mut out = [0u8; 16];
        out.copy_from_slice(&full[..16]);
        Self(out)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse from lowercase hex.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid content digest hex"))
    }
}

// ---------------------------------------------------------------------------
// ReceiptImage
// ---------------------------------------------------------------------------

/// One captured receipt image and its pipeline bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptImage {
    /// Primary key.
    pub id: ImageId,
    /// Partitioning key.
    pub user_id: UserId,
    /// Lifecycle trace carried through every request touching this image.
    pub trace_id: TraceId,
    /// Current pipeline state.
    pub status: ImageStatus,
    /// Path of the blob on the local durable store.
    pub local_path: String,
    /// Object key, set when the upload starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    /// Dedup digest, set on compression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<ContentDigest>,
    /// Size of the captured blob in bytes.
    pub original_size: u64,
    /// Size after compression, when compression ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    /// Upload attempts so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Capture time.
    pub created_at: DateTime<Utc>,
    /// Set when the object landed remotely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Set when OCR produced a transaction row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Populated only in `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Taxonomy kind of the failure, when classified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ReceiptImage {
    /// Fresh `pending` row for a newly-captured blob.
    pub fn new_pending(
        id: ImageId,
        user_id: UserId,
        trace_id: TraceId,
        local_path: impl Into<String>,
        original_size: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            trace_id,
            status: ImageStatus::Pending,
            local_path: local_path.into(),
            object_key: None,
            content_digest: None,
            original_size,
            compressed_size: None,
            retry_count: 0,
            created_at,
            uploaded_at: None,
            processed_at: None,
            error: None,
            error_kind: None,
        }
    }

    /// Whether invariant (a) holds: `uploaded` implies an object key and an
    /// upload timestamp.
    pub fn upload_fields_consistent(&self) -> bool {
        if self.status.occupies_remote() {
            self.object_key.is_some() && self.uploaded_at.is_some()
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[ImageStatus] = &[
        ImageStatus::Pending,
        ImageStatus::Compressed,
        ImageStatus::Uploading,
        ImageStatus::Uploaded,
        ImageStatus::Processing,
        ImageStatus::Processed,
        ImageStatus::Confirmed,
        ImageStatus::Failed,
        ImageStatus::Skipped,
    ];

    #[test]
    fn happy_path_is_reachable() {
        let path = [
            ImageStatus::Pending,
            ImageStatus::Compressed,
            ImageStatus::Uploading,
            ImageStatus::Uploaded,
            ImageStatus::Processing,
            ImageStatus::Processed,
            ImageStatus::Confirmed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} must be valid",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn terminal_states_have_no_successors() {
        assert!(ImageStatus::Confirmed.valid_transitions().is_empty());
        assert!(ImageStatus::Skipped.valid_transitions().is_empty());
        assert!(ImageStatus::Confirmed.is_terminal());
        assert!(ImageStatus::Skipped.is_terminal());
    }

    #[test]
    fn failed_only_returns_to_pending() {
        assert_eq!(ImageStatus::Failed.valid_transitions(), &[ImageStatus::Pending]);
    }

    #[test]
    fn restart_demotion_is_legal() {
        assert!(ImageStatus::Uploading.can_transition_to(ImageStatus::Compressed));
    }

    #[test]
    fn no_skipping_ahead() {
        assert!(!ImageStatus::Pending.can_transition_to(ImageStatus::Uploaded));
        assert!(!ImageStatus::Compressed.can_transition_to(ImageStatus::Processed));
        assert!(!ImageStatus::Uploaded.can_transition_to(ImageStatus::Confirmed));
    }

    #[test]
    fn occupies_remote_set() {
        for s in ALL {
            let expected = matches!(
                s,
                ImageStatus::Uploaded
                    | ImageStatus::Processing
                    | ImageStatus::Processed
                    | ImageStatus::Confirmed
            );
            assert_eq!(s.occupies_remote(), expected, "{s}");
        }
    }

    #[test]
    fn digest_is_stable_and_hex_roundtrips() {
        let d = ContentDigest::of(b"receipt bytes");
        assert_eq!(d, ContentDigest::of(b"receipt bytes"));
        assert_ne!(d, ContentDigest::of(b"other bytes"));
        let hexed = d.to_string();
        assert_eq!(hexed.len(), 32);
        assert_eq!(ContentDigest::from_hex(&hexed), Some(d));
    }

    #[test]
    fn digest_serde_roundtrip() {
        let d = ContentDigest::of(b"x");
        let json = serde_json::to_string(&d).unwrap();
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        assert!(serde_json::from_str::<ContentDigest>("\"zz\"").is_err());
    }

    #[test]
    fn upload_consistency_invariant() {
        let mut img = ReceiptImage::new_pending(
            ImageId::new("1738000000000-a.jpg").unwrap(),
            UserId::new("device-abc").unwrap(),
            TraceId::random(),
            "/blobs/a.jpg",
            300 * 1024,
            Utc::now(),
        );
        assert!(img.upload_fields_consistent());
        img.status = ImageStatus::Uploaded;
        assert!(!img.upload_fields_consistent());
        img.object_key = Some("uploads/device-abc/1738000000000-a.jpg".into());
        img.uploaded_at = Some(Utc::now());
        assert!(img.upload_fields_consistent());
    }
}
