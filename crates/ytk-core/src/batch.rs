// SPDX-License-Identifier: MIT OR Apache-2.0
//! OCR batch job records.

use crate::id::{IntentId, JobId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a vendor batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchJobStatus {
    /// The orchestrator holds the intent barrier and is building a manifest.
    Processing,
    /// The vendor accepted the job.
    Submitted,
    /// Results were ingested.
    Completed,
    /// The job failed; see the record's error field.
    Failed,
}

impl BatchJobStatus {
    /// Terminal statuses cache their `job_id` for idempotent re-submission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stable wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Submitted => "SUBMITTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BatchJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One batch job record.
///
/// `intent_id` is the true primary key: it guarantees exactly-once vendor
/// submission under client retry. `job_id` is a secondary lookup key
/// assigned by the vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    /// Idempotency key chosen by the submitter. Primary key.
    pub intent_id: IntentId,
    /// Vendor-assigned id, set once the job is created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Submitting user.
    pub user_id: UserId,
    /// Current status.
    pub status: BatchJobStatus,
    /// When the intent was accepted.
    pub submit_time: DateTime<Utc>,
    /// Number of images in the manifest.
    pub pending_image_count: usize,
    /// Vision model the manifest targets.
    pub model_id: String,
    /// Object key of the manifest, set once written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_uri: Option<String>,
    /// Record TTL in epoch seconds.
    pub ttl: i64,
    /// Failure detail, populated only in `FAILED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_form_is_screaming() {
        assert_eq!(
            serde_json::to_string(&BatchJobStatus::Processing).unwrap(),
            "\"PROCESSING\""
        );
        let back: BatchJobStatus = serde_json::from_str("\"SUBMITTED\"").unwrap();
        assert_eq!(back, BatchJobStatus::Submitted);
    }

    #[test]
    fn terminality() {
        assert!(BatchJobStatus::Completed.is_terminal());
        assert!(BatchJobStatus::Failed.is_terminal());
        assert!(!BatchJobStatus::Processing.is_terminal());
        assert!(!BatchJobStatus::Submitted.is_terminal());
    }
}
