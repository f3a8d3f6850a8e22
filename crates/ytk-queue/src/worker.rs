// SPDX-License-Identifier: MIT OR Apache-2.0
//! The upload worker: one long-lived task, one in-flight upload at a time.
//!
//! Each image's failure is isolated — the worker never aborts the queue for
//! a single error. Retries happen inside the unit that owns the image:
//! presign + PUT, then `1s, 2s, 4s` backoff while the error stays
//! retriable, then `failed`. Presigned URLs are single-use, so every
//! attempt starts with a fresh presign.

use crate::cancel::CancellationToken;
use crate::gate::{BlobUploader, PresignGate, PresignRequest};
use crate::queue::{QueueError, UploadQueue};
use crate::status::PauseReason;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use ytk_capture::{Compressor, compress_blob};
use ytk_core::{
    ContentDigest, ErrorKind, ImageStatus, IntentId, MAX_RETRY_COUNT, ReceiptImage,
    RETRY_DELAYS_MS, TransportError,
};
use ytk_telemetry::{EventLevel, EventName, TelemetryEvent};

/// Content type of every uploaded payload.
const UPLOAD_CONTENT_TYPE: &str = "image/webp";

/// The single logical upload task.
pub struct UploadWorker {
    queue: UploadQueue,
    gate: Arc<dyn PresignGate>,
    uploader: Arc<dyn BlobUploader>,
    compressor: Arc<dyn Compressor>,
    cancel: CancellationToken,
}

impl UploadWorker {
    /// Assemble a worker over the queue and its cloud capabilities.
    pub fn new(
        queue: UploadQueue,
        gate: Arc<dyn PresignGate>,
        uploader: Arc<dyn BlobUploader>,
        compressor: Arc<dyn Compressor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            gate,
            uploader,
            compressor,
            cancel,
        }
    }

    /// Run until cancelled: drain ready work, then sleep on the wake
    /// channel.
    pub async fn run(self, mut wake: mpsc::UnboundedReceiver<()>) {
        loop {
            loop {
                if self.cancel.is_cancelled() {
                    return;
                }
                match self.process_next().await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(err) => {
                        // Failure isolation: log, move on, keep the queue alive.
                        warn!(error = %err, "upload worker unit failed");
                        break;
                    }
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                msg = wake.recv() => {
                    if msg.is_none() {
                        return;
                    }
                }
            }
        }
    }

    /// Process one unit of work. Returns `false` when there is nothing
    /// ready (or the queue is paused).
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        if let Some(row) = self.queue.next_in(ImageStatus::Pending).await? {
            if !self.queue.begin_unit() {
                return Ok(false);
            }
            let result = self.compress_unit(row).await;
            self.queue.end_unit();
            result?;
            return Ok(true);
        }
        if let Some(row) = self.queue.next_in(ImageStatus::Compressed).await? {
            if !self.queue.begin_unit() {
                return Ok(false);
            }
            let result = self.upload_unit(row).await;
            self.queue.end_unit();
            result?;
            return Ok(true);
        }
        Ok(false)
    }

    // -- Compression stage -----------------------------------------------

    async fn compress_unit(&self, row: ReceiptImage) -> Result<(), QueueError> {
        // A retried image already carries its compressed payload.
        if row.content_digest.is_some() {
            self.queue
                .transition(&row.id, ImageStatus::Compressed, |_| {})
                .await?;
            return Ok(());
        }

        let Some(bytes) = self.queue.inner.blobs.read(&row.local_path).await? else {
            self.fail(&row, ErrorKind::Unknown, "missing_local_blob").await?;
            return Ok(());
        };

        match compress_blob(self.compressor.as_ref(), bytes).await {
            Ok(outcome) => {
                let digest = ContentDigest::of(&outcome.bytes);
                let path = self.queue.inner.blobs.save(&row.id, outcome.bytes).await?;
                let compressed_size = outcome.compressed_size;
                self.queue
                    .transition(&row.id, ImageStatus::Compressed, |r| {
                        r.local_path = path;
                        r.content_digest = Some(digest);
                        r.compressed_size = Some(compressed_size);
                    })
                    .await?;
            }
            Err(err) => {
                self.fail(&row, ErrorKind::Unknown, &format!("compression failed: {err}"))
                    .await?;
            }
        }
        Ok(())
    }

    // -- Upload stage ----------------------------------------------------

    async fn upload_unit(&self, row: ReceiptImage) -> Result<(), QueueError> {
        // Dedup: if these bytes already occupy cloud storage for this user,
        // the new arrival terminates in `skipped` and its blob is released.
        if let Some(digest) = row.content_digest {
            let twins = self
                .queue
                .inner
                .images
                .find_by_digest(&row.user_id, &digest)
                .await?;
            let duplicate = twins
                .iter()
                .any(|twin| twin.id != row.id && twin.status.occupies_remote());
            if duplicate {
                self.queue
                    .transition(&row.id, ImageStatus::Skipped, |_| {})
                    .await?;
                self.queue.inner.blobs.delete(&row.local_path).await?;
                self.emit(&row, EventName::UploadSkipped, EventLevel::Info);
                return Ok(());
            }
        }

        let Some(bytes) = self.queue.inner.blobs.read(&row.local_path).await? else {
            self.fail(&row, ErrorKind::Unknown, "missing_local_blob").await?;
            return Ok(());
        };

        self.queue
            .transition(&row.id, ImageStatus::Uploading, |_| {})
            .await?;
        self.emit(&row, EventName::UploadStarted, EventLevel::Info);

        let permit = self.queue.inner.quota.current_permit().await?;
        // The upload is named by the image id itself, so the key the gate
        // allocates round-trips back into the same id on the OCR side.
        let request = PresignRequest {
            user_id: row.user_id.clone(),
            file_name: row.id.to_string(),
            content_type: UPLOAD_CONTENT_TYPE.into(),
            permit,
            trace_id: row.trace_id.clone(),
            intent_id: IntentId::for_upload(&row.id),
        };

        let mut attempt: u32 = 0;
        loop {
            match self.try_once(&row, &request, bytes.clone()).await {
                Ok(key) => {
                    let now = self.queue.inner.clock.now();
                    self.queue
                        .transition(&row.id, ImageStatus::Uploaded, |r| {
                            r.object_key = Some(key);
                            r.uploaded_at = Some(now);
                        })
                        .await?;
                    self.queue.inner.quota.record_upload().await?;
                    self.emit(&row, EventName::UploadCompleted, EventLevel::Info);
                    return Ok(());
                }
                Err(err) => {
                    let kind = err.kind();
                    if kind == ErrorKind::Quota {
                        // The gate said no: stop the whole queue, not just
                        // this image.
                        self.queue.pause(PauseReason::Quota);
                        self.emit(&row, EventName::QuotaExceeded, EventLevel::Warn);
                        self.fail(&row, kind, &err.to_string()).await?;
                        return Ok(());
                    }
                    if !kind.is_retriable() || attempt >= MAX_RETRY_COUNT {
                        self.fail(&row, kind, &err.to_string()).await?;
                        return Ok(());
                    }

                    let delay = RETRY_DELAYS_MS[attempt as usize];
                    attempt += 1;
                    self.queue
                        .transition(&row.id, ImageStatus::Uploading, |r| {
                            r.retry_count = attempt;
                        })
                        .await?;

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            // Shutdown mid-retry: the row stays `uploading`
                            // and restart recovery rewinds it.
                            return Ok(());
                        }
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                }
            }
        }
    }

    /// One attempt: fresh presign, then PUT.
    async fn try_once(
        &self,
        row: &ReceiptImage,
        request: &PresignRequest,
        bytes: Vec<u8>,
    ) -> Result<String, TransportError> {
        let grant = self.gate.presign_upload(request).await?;
        // The key is recorded as soon as the upload starts; a failed PUT
        // leaves it behind for diagnostics.
        let _ = self
            .queue
            .transition(&row.id, ImageStatus::Uploading, |r| {
                r.object_key = Some(grant.key.clone());
            })
            .await;
        self.uploader
            .upload(&grant, bytes, UPLOAD_CONTENT_TYPE)
            .await?;
        Ok(grant.key)
    }

    async fn fail(
        &self,
        row: &ReceiptImage,
        kind: ErrorKind,
        message: &str,
    ) -> Result<(), QueueError> {
        let updated = self
            .queue
            .transition(&row.id, ImageStatus::Failed, |r| {
                r.error = Some(message.to_string());
                r.error_kind = Some(kind);
            })
            .await?;
        self.emit(&updated, EventName::UploadFailed, EventLevel::Error);
        Ok(())
    }

    fn emit(&self, row: &ReceiptImage, event: EventName, level: EventLevel) {
        TelemetryEvent::new(event, row.trace_id.clone())
            .level(level)
            .user(row.user_id.clone())
            .field("image_id", row.id.as_str())
            .field("retry_count", row.retry_count)
            .emit();
        self.queue.counters().record(event);
    }
}

