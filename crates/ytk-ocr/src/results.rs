// SPDX-License-Identifier: MIT OR Apache-2.0
//! Result handler: ingests vendor batch output into the transactions table.
//!
//! Pillars: exactly-once into the store (conditional put on a stable
//! derived id), tolerance of at-least-once event delivery, chunked writes
//! to respect store batch limits, and JST dating for object partitions.
//! Post-OCR object moves that fail are parked under `dead-letters/` and
//! never abort the batch.

use crate::airlock::airlock_decode;
use crate::instant::{build_row, needs_review_row};
use crate::jst::jst_date;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use ytk_core::{
    BatchJob, BatchJobStatus, ImageId, JobId, RESULT_WRITE_CHUNK, TraceId, Transaction,
    TransactionId, TransactionStatus,
};
use ytk_store::{BatchJobRepo, Clock, ObjectStore, StoreError, TransactionRepo, move_object};
use ytk_telemetry::{EventLevel, EventName, TelemetryEvent};

/// Write retries per chunk before giving up.
const CHUNK_RETRIES: u32 = 3;

/// Errors from the result handler.
#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    /// No record matches the vendor job id.
    #[error("unknown batch job: {0}")]
    UnknownJob(JobId),
    /// The vendor output object is missing.
    #[error("batch output missing for job {0}")]
    MissingOutput(JobId),
    /// Storage failure that exhausted its retries.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts from one batch-output ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSummary {
    /// Rows written `unconfirmed`.
    pub written: usize,
    /// Rows written `needs_review`.
    pub needs_review: usize,
    /// Conditional puts that found an existing row.
    pub duplicates: usize,
    /// Output lines rejected before the airlock (missing fields).
    pub bad_lines: usize,
    /// Objects moved into the processed partition.
    pub moved: usize,
    /// Failed moves parked under `dead-letters/`.
    pub dead_letters: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputLine {
    custom_data: String,
    output: OutputBody,
}

#[derive(Debug, Deserialize)]
struct OutputBody {
    text: String,
}

/// Ingests `batch-output/{jobId}/output.jsonl`.
pub struct ResultHandler {
    objects: Arc<dyn ObjectStore>,
    transactions: Arc<dyn TransactionRepo>,
    jobs: Arc<dyn BatchJobRepo>,
    clock: Arc<dyn Clock>,
}

impl ResultHandler {
    /// Assemble the handler over its capabilities.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        transactions: Arc<dyn TransactionRepo>,
        jobs: Arc<dyn BatchJobRepo>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            objects,
            transactions,
            jobs,
            clock,
        }
    }

    /// Process the output of one finished vendor job.
    pub async fn handle_batch_output(&self, job_id: &JobId) -> Result<ResultSummary, ResultError> {
        let Some(job) = self.jobs.get_by_job(job_id).await? else {
            return Err(ResultError::UnknownJob(job_id.clone()));
        };

        let output_key = format!("batch-output/{job_id}/output.jsonl");
        let Some(output) = self.objects.get(&output_key).await? else {
            return Err(ResultError::MissingOutput(job_id.clone()));
        };
        let body = String::from_utf8_lossy(&output.bytes).into_owned();

        let trace = TraceId::random();
        let mut summary = ResultSummary::default();
        let mut rows: Vec<(Transaction, ImageId)> = Vec::new();

        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            let parsed: OutputLine = match serde_json::from_str(line) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "unparseable output line");
                    summary.bad_lines += 1;
                    continue;
                }
            };
            let Ok(image_id) = ImageId::new(parsed.custom_data.clone()) else {
                warn!(job_id = %job_id, custom_data = %parsed.custom_data, "bad image id");
                summary.bad_lines += 1;
                continue;
            };

            // Stable per retry: the id is a function of the job, the image,
            // and the job's (fixed) submit time.
            let tx_id = TransactionId::derived(
                job_id,
                &image_id,
                job.submit_time.timestamp_millis(),
            );
            let now = self.clock.now();
            let row = match airlock_decode(&parsed.output.text) {
                Ok(extracted) => build_row(tx_id, &job.user_id, &image_id, extracted, now),
                Err(rejection) => {
                    needs_review_row(tx_id, &job.user_id, &image_id, rejection, now)
                }
            };
            rows.push((row, image_id));
        }

        // Chunked conditional puts with exponential backoff.
        for chunk in rows.chunks(RESULT_WRITE_CHUNK) {
            self.write_chunk(chunk, &mut summary).await?;
        }

        // Move every processed image out of uploads/. Failures are parked,
        // never fatal.
        for (_, image_id) in &rows {
            self.migrate_object(&job, image_id, &mut summary).await?;
        }

        let mut completed = job.clone();
        completed.status = BatchJobStatus::Completed;
        self.jobs.update(completed).await?;

        TelemetryEvent::new(EventName::BatchCompleted, trace)
            .user(job.user_id.clone())
            .field("job_id", job_id.as_str())
            .field("written", summary.written)
            .field("needs_review", summary.needs_review)
            .field("dead_letters", summary.dead_letters)
            .emit();

        Ok(summary)
    }

    async fn write_chunk(
        &self,
        chunk: &[(Transaction, ImageId)],
        summary: &mut ResultSummary,
    ) -> Result<(), ResultError> {
        let mut attempt = 0u32;
        loop {
            match self.try_write_chunk(chunk, summary).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < CHUNK_RETRIES => {
                    let delay = 100u64 * 2u64.pow(attempt);
                    attempt += 1;
                    warn!(error = %err, attempt, delay_ms = delay, "chunk write retry");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn try_write_chunk(
        &self,
        chunk: &[(Transaction, ImageId)],
        summary: &mut ResultSummary,
    ) -> Result<(), StoreError> {
        for (row, _) in chunk {
            let status = row.status;
            if self.transactions.insert_if_absent(row.clone()).await? {
                match status {
                    TransactionStatus::NeedsReview => summary.needs_review += 1,
                    _ => summary.written += 1,
                }
            } else {
                summary.duplicates += 1;
            }
        }
        Ok(())
    }

    async fn migrate_object(
        &self,
        job: &BatchJob,
        image_id: &ImageId,
        summary: &mut ResultSummary,
    ) -> Result<(), ResultError> {
        let source = format!("uploads/{}/{}", job.user_id, image_id);
        let now = self.clock.now();
        let destination = format!("processed/{}/{}/{}", jst_date(now), job.user_id, image_id);

        match move_object(self.objects.as_ref(), &source, &destination).await {
            Ok(()) => {
                summary.moved += 1;
                Ok(())
            }
            Err(err) => {
                summary.dead_letters += 1;
                let job_id = job.job_id.as_ref().map(JobId::as_str).unwrap_or("unknown");
                let envelope = json!({
                    "jobId": job_id,
                    "imageId": image_id,
                    "source": source,
                    "destination": destination,
                    "error": err.to_string(),
                    "at": now.to_rfc3339(),
                });
                let key = format!("dead-letters/{}/{}.json", job_id, now.timestamp_millis());
                self.objects
                    .put(&key, envelope.to_string().into_bytes(), BTreeMap::new())
                    .await?;
                TelemetryEvent::new(EventName::DeadLetterWritten, TraceId::random())
                    .level(EventLevel::Warn)
                    .user(job.user_id.clone())
                    .field("key", key)
                    .emit();
                Ok(())
            }
        }
    }
}
