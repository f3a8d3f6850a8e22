// SPDX-License-Identifier: MIT OR Apache-2.0
//! Batch path: idempotent submission of image batches to the vision vendor.

use crate::vision::{EXTRACTION_PROMPT, VisionError, VisionModel};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Days;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;
use ytk_core::{
    BATCH_JOB_TTL_DAYS, BatchJob, BatchJobStatus, ImageId, IntentId, JobId, MANIFEST_MAX_RECORDS,
    MIN_BATCH_IMAGES, TraceId, UserId,
};
use ytk_store::{BatchJobRepo, Clock, ObjectStore, StoreError};
use ytk_telemetry::{EventName, TelemetryEvent};

/// Estimated vendor cost per image, USD, at batch pricing.
const COST_PER_IMAGE_USD: f64 = 0.0004;

/// Submission request, as received by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmitRequest {
    /// Idempotency key chosen by the client.
    pub intent_id: IntentId,
    /// Images to process; at least [`MIN_BATCH_IMAGES`].
    pub pending_image_ids: Vec<ImageId>,
    /// Vision model to target.
    pub model_id: String,
    /// Submitting user.
    pub user_id: UserId,
}

/// Errors from a batch submission.
#[derive(Debug, thiserror::Error)]
pub enum BatchSubmitError {
    /// Too few images for a batch.
    #[error("batch needs at least {need} images, got {got}")]
    BelowThreshold {
        /// Images supplied.
        got: usize,
        /// Minimum required.
        need: usize,
    },
    /// A concurrent duplicate won the intent barrier; retry shortly.
    #[error("intent {0} is being processed concurrently")]
    RaceLost(IntentId),
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Vendor failure; the job record is marked `FAILED`.
    #[error(transparent)]
    Vision(#[from] VisionError),
}

/// Accepted submission, returned as `202`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmitOutcome {
    /// Vendor job id; absent while a concurrent submission is still
    /// preparing its manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Job status at response time.
    pub status: BatchJobStatus,
    /// `true` when the response came from the idempotency cache.
    pub cached: bool,
    /// Images actually manifested.
    pub image_count: usize,
    /// Rough vendor cost estimate, USD.
    pub estimated_cost: f64,
    /// Rough completion estimate, seconds.
    pub estimated_duration_secs: u64,
}

/// Builds manifests and submits vendor batch jobs, exactly once per intent.
pub struct BatchOrchestrator {
    jobs: Arc<dyn BatchJobRepo>,
    objects: Arc<dyn ObjectStore>,
    vision: Arc<dyn VisionModel>,
    clock: Arc<dyn Clock>,
    threshold: usize,
}

impl BatchOrchestrator {
    /// Assemble an orchestrator with the default threshold.
    pub fn new(
        jobs: Arc<dyn BatchJobRepo>,
        objects: Arc<dyn ObjectStore>,
        vision: Arc<dyn VisionModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_threshold(jobs, objects, vision, clock, MIN_BATCH_IMAGES)
    }

    /// Assemble an orchestrator with an explicit trigger threshold,
    /// clamped to the supported 100–500 range.
    pub fn with_threshold(
        jobs: Arc<dyn BatchJobRepo>,
        objects: Arc<dyn ObjectStore>,
        vision: Arc<dyn VisionModel>,
        clock: Arc<dyn Clock>,
        threshold: usize,
    ) -> Self {
        Self {
            jobs,
            objects,
            vision,
            clock,
            threshold: threshold.clamp(MIN_BATCH_IMAGES, 500),
        }
    }

    /// Submit a batch. Re-submitting the same intent returns the cached
    /// job instead of creating a second vendor job.
    pub async fn submit(
        &self,
        request: BatchSubmitRequest,
        trace: &TraceId,
    ) -> Result<BatchSubmitOutcome, BatchSubmitError> {
        if request.pending_image_ids.len() < self.threshold {
            return Err(BatchSubmitError::BelowThreshold {
                got: request.pending_image_ids.len(),
                need: self.threshold,
            });
        }

        // Idempotency pre-check: any existing record for this intent is
        // authoritative, whatever its state.
        if let Some(existing) = self.jobs.get(&request.intent_id).await? {
            return Ok(outcome_from(&existing, true));
        }

        // Barrier: exactly one concurrent submission inserts the record.
        let now = self.clock.now();
        let record = BatchJob {
            intent_id: request.intent_id.clone(),
            job_id: None,
            user_id: request.user_id.clone(),
            status: BatchJobStatus::Processing,
            submit_time: now,
            pending_image_count: request.pending_image_ids.len(),
            model_id: request.model_id.clone(),
            manifest_uri: None,
            ttl: now
                .checked_add_days(Days::new(BATCH_JOB_TTL_DAYS as u64))
                .unwrap_or(now)
                .timestamp(),
            error: None,
        };
        if !self.jobs.insert_if_absent(record.clone()).await? {
            return Err(BatchSubmitError::RaceLost(request.intent_id));
        }

        TelemetryEvent::new(EventName::BatchStarted, trace.clone())
            .user(request.user_id.clone())
            .field("intent_id", request.intent_id.as_str())
            .field("images", request.pending_image_ids.len())
            .emit();

        let (manifest_key, manifested) = self.write_manifest(&request, now).await?;

        let mut record = record;
        record.pending_image_count = manifested;
        record.manifest_uri = Some(manifest_key.clone());

        match self.vision.create_batch(&manifest_key, manifested).await {
            Ok(job_id) => {
                record.job_id = Some(job_id);
                record.status = BatchJobStatus::Submitted;
                self.jobs.update(record.clone()).await?;
                TelemetryEvent::new(EventName::BatchSubmitted, trace.clone())
                    .user(request.user_id)
                    .field("job_id", record.job_id.as_ref().map(|j| j.as_str()))
                    .emit();
                Ok(outcome_from(&record, false))
            }
            Err(err) => {
                record.status = BatchJobStatus::Failed;
                record.error = Some(err.to_string());
                self.jobs.update(record).await?;
                Err(err.into())
            }
        }
    }

    /// Build the JSON-Lines manifest: one record per located image, capped
    /// at [`MANIFEST_MAX_RECORDS`] to bound worker runtime.
    async fn write_manifest(
        &self,
        request: &BatchSubmitRequest,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(String, usize), StoreError> {
        let capped = request.pending_image_ids.len().min(MANIFEST_MAX_RECORDS);
        if capped < request.pending_image_ids.len() {
            warn!(
                dropped = request.pending_image_ids.len() - capped,
                intent_id = %request.intent_id,
                "manifest capped; remaining images need a follow-up batch"
            );
        }

        let mut lines = Vec::with_capacity(capped);
        for image_id in request.pending_image_ids.iter().take(MANIFEST_MAX_RECORDS) {
            let key = format!("uploads/{}/{}", request.user_id, image_id);
            let Some(record) = self.objects.get(&key).await? else {
                warn!(key = %key, "manifest image missing; skipped");
                continue;
            };
            let line = json!({
                "modelId": request.model_id,
                "input": {
                    "text": EXTRACTION_PROMPT,
                    "image": BASE64.encode(&record.bytes),
                },
                "customData": image_id,
            });
            lines.push(line.to_string());
        }

        let manifest_key = format!("batch-input/manifest-{}.jsonl", now.timestamp_millis());
        let body = lines.join("\n");
        let count = lines.len();
        self.objects
            .put(&manifest_key, body.into_bytes(), BTreeMap::new())
            .await?;
        Ok((manifest_key, count))
    }
}

fn outcome_from(record: &BatchJob, cached: bool) -> BatchSubmitOutcome {
    BatchSubmitOutcome {
        job_id: record.job_id.clone(),
        status: record.status,
        cached,
        image_count: record.pending_image_count,
        estimated_cost: record.pending_image_count as f64 * COST_PER_IMAGE_USD,
        estimated_duration_secs: 1_800 + 2 * record.pending_image_count as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::MockVisionModel;
    use ytk_store::{FixedClock, MemoryBatchJobRepo, MemoryObjectStore};

    struct Rig {
        orchestrator: BatchOrchestrator,
        jobs: MemoryBatchJobRepo,
        objects: MemoryObjectStore,
        vision: Arc<MockVisionModel>,
    }

    fn rig() -> Rig {
        let jobs = MemoryBatchJobRepo::new();
        let objects = MemoryObjectStore::new();
        let vision = MockVisionModel::shared();
        let clock = FixedClock::at("2026-01-15T03:00:00Z".parse().unwrap());
        let orchestrator = BatchOrchestrator::new(
            Arc::new(jobs.clone()),
            Arc::new(objects.clone()),
            vision.clone(),
            Arc::new(clock),
        );
        Rig {
            orchestrator,
            jobs,
            objects,
            vision,
        }
    }

    async fn seed_uploads(objects: &MemoryObjectStore, count: usize) -> Vec<ImageId> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let id = ImageId::new(format!("{}-r{i}.webp", 1_738_000_000_000u64 + i as u64))
                .unwrap();
            objects
                .put(
                    &format!("uploads/device-abc/{id}"),
                    vec![i as u8; 16],
                    BTreeMap::new(),
                )
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }

    fn request(intent: &str, ids: Vec<ImageId>) -> BatchSubmitRequest {
        BatchSubmitRequest {
            intent_id: IntentId::new(intent).unwrap(),
            pending_image_ids: ids,
            model_id: "vision-1".into(),
            user_id: UserId::new("device-abc").unwrap(),
        }
    }

    fn trace() -> TraceId {
        TraceId::new("trace-batch").unwrap()
    }

    #[tokio::test]
    async fn submit_writes_manifest_and_records_job() {
        let rig = rig();
        let ids = seed_uploads(&rig.objects, 100).await;

        let outcome = rig
            .orchestrator
            .submit(request("intent-1", ids), &trace())
            .await
            .unwrap();
        assert!(!outcome.cached);
        assert_eq!(outcome.status, BatchJobStatus::Submitted);
        assert_eq!(outcome.image_count, 100);
        assert!(outcome.job_id.is_some());

        let record = rig
            .jobs
            .get(&IntentId::new("intent-1").unwrap())
            .await
            .unwrap()
            .unwrap();
        let manifest_key = record.manifest_uri.unwrap();
        let manifest = rig.objects.get(&manifest_key).await.unwrap().unwrap();
        let body = String::from_utf8(manifest.bytes).unwrap();
        assert_eq!(body.lines().count(), 100);

        // Every line is a self-contained JSON record with the image inline.
        let first: serde_json::Value = serde_json::from_str(body.lines().next().unwrap()).unwrap();
        assert_eq!(first["modelId"], "vision-1");
        assert!(first["input"]["image"].as_str().unwrap().len() > 8);
        assert!(first["customData"].as_str().unwrap().starts_with("1738000000000-"));
    }

    #[tokio::test]
    async fn duplicate_intent_returns_cached_job() {
        let rig = rig();
        let ids = seed_uploads(&rig.objects, 100).await;

        let first = rig
            .orchestrator
            .submit(request("intent-x", ids.clone()), &trace())
            .await
            .unwrap();
        let second = rig
            .orchestrator
            .submit(request("intent-x", ids), &trace())
            .await
            .unwrap();

        assert!(second.cached);
        assert_eq!(first.job_id, second.job_id);
        // The vendor saw exactly one job.
        assert_eq!(rig.vision.batch_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn below_threshold_is_rejected() {
        let rig = rig();
        let ids = seed_uploads(&rig.objects, 5).await;
        let err = rig
            .orchestrator
            .submit(request("intent-small", ids), &trace())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BatchSubmitError::BelowThreshold { got: 5, need: 100 }
        ));
    }

    #[tokio::test]
    async fn missing_objects_are_skipped_not_fatal() {
        let rig = rig();
        let mut ids = seed_uploads(&rig.objects, 100).await;
        // Two ids that never landed in storage.
        ids.push(ImageId::new("1739000000000-ghost1.webp").unwrap());
        ids.push(ImageId::new("1739000000001-ghost2.webp").unwrap());

        let outcome = rig
            .orchestrator
            .submit(request("intent-ghost", ids), &trace())
            .await
            .unwrap();
        assert_eq!(outcome.image_count, 100);
    }

    #[tokio::test]
    async fn manifest_caps_at_one_thousand_records() {
        let rig = rig();
        let ids = seed_uploads(&rig.objects, 1_050).await;
        let outcome = rig
            .orchestrator
            .submit(request("intent-big", ids), &trace())
            .await
            .unwrap();
        assert_eq!(outcome.image_count, 1_000);
    }
}
