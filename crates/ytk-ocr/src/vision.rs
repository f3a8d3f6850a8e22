// SPDX-License-Identifier: MIT OR Apache-2.0
//! Vision model capability.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use ytk_core::JobId;

/// Language-agnostic multimodal prompt. The schema is fixed; the airlock
/// enforces it on the way back in.
pub const EXTRACTION_PROMPT: &str = "\
Extract the transaction from this receipt image. Respond with ONLY a JSON \
object, no prose, in this exact shape: {\"amount\": <integer, minor \
units>, \"type\": \"income\"|\"expense\", \"date\": \"YYYY-MM-DD\", \
\"merchant\": <string>, \"category\": \"groceries\"|\"dining\"|\
\"transport\"|\"utilities\"|\"health\"|\"entertainment\"|\"shopping\"|\
\"travel\"|\"income\"|\"other\", \"description\": <string>}";

/// Errors from the vision vendor.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    /// The vendor call failed (network, throttle, 5xx).
    #[error("vision call failed: {0}")]
    CallFailed(String),
    /// The vendor refused the batch job.
    #[error("batch submission refused: {0}")]
    BatchRefused(String),
}

/// Remote vision model. Always remote; there is no offline OCR.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Run the multimodal prompt over one image, returning the raw model
    /// text. Callers airlock the result.
    async fn extract(&self, image: &[u8], prompt: &str) -> Result<String, VisionError>;

    /// Create a vendor batch job over a prepared manifest. Returns the
    /// vendor-assigned job id.
    async fn create_batch(&self, manifest_key: &str, record_count: usize)
    -> Result<JobId, VisionError>;
}

/// Scripted [`VisionModel`] for tests and mock mode.
#[derive(Default)]
pub struct MockVisionModel {
    responses: Mutex<VecDeque<String>>,
    batch_jobs: Mutex<Vec<(String, usize)>>,
}

impl MockVisionModel {
    /// New mock with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Script the next `extract` response.
    pub async fn push_response(&self, raw: impl Into<String>) {
        self.responses.lock().await.push_back(raw.into());
    }

    /// Batch jobs created so far: `(manifest_key, record_count)`.
    pub async fn batch_jobs(&self) -> Vec<(String, usize)> {
        self.batch_jobs.lock().await.clone()
    }
}

#[async_trait]
impl VisionModel for MockVisionModel {
    async fn extract(&self, _image: &[u8], _prompt: &str) -> Result<String, VisionError> {
        match self.responses.lock().await.pop_front() {
            Some(raw) => Ok(raw),
            None => Ok(r#"{"amount": 1000, "type": "expense", "date": "2026-01-15",
                           "merchant": "Mock Mart", "category": "other",
                           "description": "mock extraction"}"#
                .to_string()),
        }
    }

    async fn create_batch(
        &self,
        manifest_key: &str,
        record_count: usize,
    ) -> Result<JobId, VisionError> {
        let mut jobs = self.batch_jobs.lock().await;
        jobs.push((manifest_key.to_string(), record_count));
        Ok(JobId::new(format!("mock-job-{}", jobs.len())).expect("non-empty"))
    }
}
