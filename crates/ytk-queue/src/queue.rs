// SPDX-License-Identifier: MIT OR Apache-2.0
//! The durable upload queue and its operations.

use crate::status::{PauseReason, QueueStats, QueueStatus};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use ytk_core::{ErrorKind, ImageId, ImageStatus, ReceiptImage, TraceId, UserId};
use ytk_permit::{LedgerError, QuotaCheck, quota::DenyReason};
use ytk_store::{BlobStore, Clock, ImageRepo, StoreError};
use ytk_telemetry::{EventCounters, EventName, TelemetryEvent};

/// Errors surfaced by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The client-side quota check refused the enqueue.
    #[error("upload not allowed: {0:?}")]
    QuotaDenied(DenyReason),

    /// No row with this id.
    #[error("image not found: {0}")]
    NotFound(ImageId),

    /// The operation is not permitted in the image's current state.
    #[error("image {id} is {status}; operation not permitted")]
    InvalidState {
        /// Affected image.
        id: ImageId,
        /// Its current status.
        status: ImageStatus,
    },

    /// Underlying storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Quota ledger failure.
    #[error("quota ledger: {0}")]
    Ledger(#[from] LedgerError),
}

/// Report of a restart recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Rows demoted `uploading → compressed`.
    pub demoted: u32,
    /// Rows failed because their local blob vanished.
    pub missing_blobs: u32,
}

pub(crate) struct QueueInner {
    pub(crate) user: UserId,
    pub(crate) images: Arc<dyn ImageRepo>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) quota: Arc<dyn QuotaCheck>,
    pub(crate) clock: Arc<dyn Clock>,
    status: watch::Sender<QueueStatus>,
    wake_tx: mpsc::UnboundedSender<()>,
    counters: EventCounters,
}

/// Handle to the upload queue. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct UploadQueue {
    pub(crate) inner: Arc<QueueInner>,
}

impl UploadQueue {
    /// Create a queue for one user, returning the worker's wake receiver.
    pub fn new(
        user: UserId,
        images: Arc<dyn ImageRepo>,
        blobs: Arc<dyn BlobStore>,
        quota: Arc<dyn QuotaCheck>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(QueueStatus::Idle);
        let queue = Self {
            inner: Arc::new(QueueInner {
                user,
                images,
                blobs,
                quota,
                clock,
                status,
                wake_tx,
                counters: EventCounters::new(),
            }),
        };
        (queue, wake_rx)
    }

    // -- Enqueue ---------------------------------------------------------

    /// Accept a newly-captured blob.
    ///
    /// The quota check is a precondition: a denied check refuses the
    /// enqueue before anything is persisted. On success the row is created
    /// in `pending`, the blob is stored, and the worker is woken; the call
    /// returns immediately.
    pub async fn enqueue(
        &self,
        bytes: Vec<u8>,
        original_name: &str,
    ) -> Result<ImageId, QueueError> {
        let decision = self.inner.quota.check().await?;
        if !decision.allowed {
            let reason = decision.reason.unwrap_or(DenyReason::NoPermit);
            self.emit_simple(EventName::QuotaExceeded, None)
                .field("reason", format!("{reason:?}"))
                .emit();
            self.inner.counters.record(EventName::QuotaExceeded);
            return Err(QueueError::QuotaDenied(reason));
        }

        let now = self.inner.clock.now();
        let id = ImageId::from_capture(now.timestamp_millis(), file_stem(original_name));
        let trace = TraceId::random();
        let size = bytes.len() as u64;
        let path = self.inner.blobs.save(&id, bytes).await?;

        let row = ReceiptImage::new_pending(id.clone(), self.inner.user.clone(), trace, path, size, now);
        self.inner.images.insert(row).await?;
        self.wake();
        Ok(id)
    }

    // -- Pause / resume --------------------------------------------------

    /// Stop the worker from starting new uploads. In-flight uploads are
    /// not interrupted.
    pub fn pause(&self, reason: PauseReason) {
        self.inner
            .status
            .send_replace(QueueStatus::Paused { reason });
    }

    /// Resume after a pause and wake the worker.
    pub fn resume(&self) {
        self.inner.status.send_replace(QueueStatus::Idle);
        self.wake();
    }

    /// Current global status.
    pub fn status(&self) -> QueueStatus {
        *self.inner.status.borrow()
    }

    /// Watch global status changes.
    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.inner.status.subscribe()
    }

    /// Mark the start of a worker unit. Returns `false` (and does not
    /// change the status) when the queue is paused.
    pub(crate) fn begin_unit(&self) -> bool {
        let mut started = false;
        self.inner.status.send_if_modified(|status| {
            if status.accepts_work() {
                started = true;
                *status = QueueStatus::Processing;
                true
            } else {
                false
            }
        });
        started
    }

    /// Mark the end of a worker unit. A pause taken while the unit ran is
    /// preserved; only `processing` winds back to `idle`.
    pub(crate) fn end_unit(&self) {
        self.inner.status.send_if_modified(|status| {
            if matches!(status, QueueStatus::Processing) {
                *status = QueueStatus::Idle;
                true
            } else {
                false
            }
        });
    }

    // -- Retry / remove --------------------------------------------------

    /// Return one failed image to `pending` with a clean slate.
    pub async fn retry_image(&self, id: &ImageId) -> Result<(), QueueError> {
        let row = self.get(id).await?;
        if row.status != ImageStatus::Failed {
            return Err(QueueError::InvalidState {
                id: id.clone(),
                status: row.status,
            });
        }
        self.transition(id, ImageStatus::Pending, |r| {
            r.retry_count = 0;
            r.error = None;
            r.error_kind = None;
        })
        .await?;
        self.wake();
        Ok(())
    }

    /// Return every failed image to `pending`. Returns the count.
    pub async fn retry_all_failed(&self) -> Result<u32, QueueError> {
        let failed = self
            .inner
            .images
            .list_by_status(&self.inner.user, ImageStatus::Failed)
            .await?;
        let mut retried = 0;
        for row in failed {
            self.transition(&row.id, ImageStatus::Pending, |r| {
                r.retry_count = 0;
                r.error = None;
                r.error_kind = None;
            })
            .await?;
            retried += 1;
        }
        if retried > 0 {
            self.wake();
        }
        Ok(retried)
    }

    /// Remove a non-terminal image and purge its local blob.
    pub async fn remove_image(&self, id: &ImageId) -> Result<(), QueueError> {
        let row = self.get(id).await?;
        if row.status.is_terminal() {
            return Err(QueueError::InvalidState {
                id: id.clone(),
                status: row.status,
            });
        }
        self.inner.blobs.delete(&row.local_path).await?;
        self.inner.images.remove(id).await?;
        Ok(())
    }

    // -- Post-upload lifecycle -------------------------------------------

    /// OCR started for an uploaded image.
    pub async fn mark_processing(&self, id: &ImageId) -> Result<(), QueueError> {
        self.transition(id, ImageStatus::Processing, |_| {}).await?;
        Ok(())
    }

    /// A transaction row exists for this image; the local blob is released.
    pub async fn mark_processed(&self, id: &ImageId) -> Result<(), QueueError> {
        let now = self.inner.clock.now();
        let row = self
            .transition(id, ImageStatus::Processed, |r| {
                r.processed_at = Some(now);
            })
            .await?;
        self.inner.blobs.delete(&row.local_path).await?;
        Ok(())
    }

    /// The user confirmed the extracted transaction.
    pub async fn confirm_image(&self, id: &ImageId) -> Result<(), QueueError> {
        self.transition(id, ImageStatus::Confirmed, |_| {}).await?;
        Ok(())
    }

    /// A transaction referencing this image arrived from the server:
    /// advance the row out of `uploaded` and release its blob.
    ///
    /// Returns `true` when the row advanced. Unknown ids (rows created on
    /// another device, manual entries) and rows already at or past
    /// `processed` are ignored — result arrival is set-wise, never ordered.
    pub async fn complete_ocr(&self, id: &ImageId) -> Result<bool, QueueError> {
        let Some(row) = self.inner.images.get(id).await? else {
            return Ok(false);
        };
        match row.status {
            ImageStatus::Uploaded => {
                self.mark_processing(id).await?;
                self.mark_processed(id).await?;
                Ok(true)
            }
            ImageStatus::Processing => {
                self.mark_processed(id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // -- Recovery & introspection ----------------------------------------

    /// Restart recovery: demote stranded `uploading` rows and fail rows
    /// whose local blob was deleted externally.
    pub async fn recover(&self) -> Result<RecoveryReport, QueueError> {
        let mut report = RecoveryReport::default();

        for row in self.inner.images.list(&self.inner.user).await? {
            let mut status = row.status;
            if status == ImageStatus::Uploading {
                self.transition(&row.id, ImageStatus::Compressed, |_| {}).await?;
                status = ImageStatus::Compressed;
                report.demoted += 1;
            }
            let needs_blob = matches!(
                status,
                ImageStatus::Pending | ImageStatus::Compressed | ImageStatus::Uploaded
            );
            if needs_blob && self.inner.blobs.read(&row.local_path).await?.is_none() {
                self.transition(&row.id, ImageStatus::Failed, |r| {
                    r.error = Some("missing_local_blob".into());
                    r.error_kind = Some(ErrorKind::Unknown);
                })
                .await?;
                report.missing_blobs += 1;
            }
        }

        self.wake();
        Ok(report)
    }

    /// Snapshot statistics for the UI.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let rows = self.inner.images.list(&self.inner.user).await?;
        let mut stats = QueueStats {
            total: rows.len(),
            ..Default::default()
        };
        for row in rows {
            *stats
                .by_status
                .entry(row.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Telemetry counters, shared with the worker.
    pub fn counters(&self) -> &EventCounters {
        &self.inner.counters
    }

    /// Fetch one image row.
    pub async fn image(&self, id: &ImageId) -> Result<ReceiptImage, QueueError> {
        self.get(id).await
    }

    // -- Internals shared with the worker --------------------------------

    pub(crate) async fn get(&self, id: &ImageId) -> Result<ReceiptImage, QueueError> {
        self.inner
            .images
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.clone()))
    }

    /// Oldest row in `status`, FIFO by `created_at`.
    pub(crate) async fn next_in(
        &self,
        status: ImageStatus,
    ) -> Result<Option<ReceiptImage>, QueueError> {
        let mut rows = self
            .inner
            .images
            .list_by_status(&self.inner.user, status)
            .await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    /// Apply a status transition plus a row mutation, then emit
    /// `STATE_TRANSITION`. The repository refuses forbidden transitions.
    pub(crate) async fn transition(
        &self,
        id: &ImageId,
        to: ImageStatus,
        mutate: impl FnOnce(&mut ReceiptImage),
    ) -> Result<ReceiptImage, QueueError> {
        let mut row = self.get(id).await?;
        let from = row.status;
        row.status = to;
        mutate(&mut row);
        self.inner.images.update(row.clone()).await?;

        TelemetryEvent::new(EventName::StateTransition, row.trace_id.clone())
            .user(row.user_id.clone())
            .field("image_id", row.id.as_str())
            .field("from", from.as_str())
            .field("to", to.as_str())
            .emit();
        self.inner.counters.record(EventName::StateTransition);
        Ok(row)
    }

    pub(crate) fn emit_simple(&self, event: EventName, trace: Option<TraceId>) -> TelemetryEvent {
        TelemetryEvent::new(event, trace.unwrap_or_else(TraceId::random))
            .user(self.inner.user.clone())
    }

    pub(crate) fn wake(&self) {
        let _ = self.inner.wake_tx.send(());
    }
}

fn file_stem(original_name: &str) -> &str {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}
