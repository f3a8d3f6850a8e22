// SPDX-License-Identifier: MIT OR Apache-2.0
//! Batch OCR submission.
//!
//! The client triggers a batch when its pending-image count crosses the
//! configured threshold; the gateway owns idempotency, so retrying the
//! same intent is always safe.

use crate::api::ApiClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ytk_core::{ImageId, IntentId, JobId, OCR_SUBMIT_TIMEOUT_SECS, TraceId, TransportError, UserId};

/// Request body for `POST /batch/submit`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmission {
    /// Idempotency key; reuse it when retrying.
    pub intent_id: IntentId,
    /// Images awaiting OCR.
    pub pending_image_ids: Vec<ImageId>,
    /// Vision model to target.
    pub model_id: String,
    /// Submitting user.
    pub user_id: UserId,
}

/// `202` response from `POST /batch/submit`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAccepted {
    /// Vendor job id, once assigned.
    pub job_id: Option<JobId>,
    /// Job status at response time.
    pub status: String,
    /// Where to poll.
    pub status_url: Option<String>,
    /// Images manifested.
    pub image_count: usize,
    /// Rough cost estimate, USD.
    pub estimated_cost: f64,
    /// Rough completion estimate, seconds.
    pub estimated_duration: u64,
    /// `true` when served from the idempotency cache.
    #[serde(default)]
    pub cached: bool,
}

/// Client for `/batch/submit`.
#[derive(Clone)]
pub struct BatchApi {
    api: ApiClient,
}

impl BatchApi {
    /// New client over the shared API plumbing.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Submit a batch within the 10-second OCR submission deadline.
    pub async fn submit(
        &self,
        submission: &BatchSubmission,
        trace: &TraceId,
    ) -> Result<BatchAccepted, TransportError> {
        self.api
            .post_json(
                "/batch/submit",
                submission,
                trace,
                Duration::from_secs(OCR_SUBMIT_TIMEOUT_SECS),
            )
            .await
    }
}
