// SPDX-License-Identifier: MIT OR Apache-2.0
//! The sync engine: dirty-flag push, cursor pull, conflict rebase.

use crate::monitor::{NetworkMonitor, Subscription};
use crate::offline::{OfflineQueue, SyncAction};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;
use ytk_core::{AUTO_SYNC_STALE_SECS, ErrorKind, ImageId, TraceId, TransactionId, UserId};
use ytk_store::{Clock, KvStore, StoreError, TransactionRepo, get_json, put_json};
use ytk_telemetry::{EventLevel, EventName, TelemetryEvent};

const CURSOR_KEY: &str = "sync/cursor";
const LAST_SYNCED_KEY: &str = "sync/last-synced-at";

/// Image-lifecycle notifications derived from pulled rows.
///
/// A transaction arriving from the server is the client's proof that OCR
/// finished for its source image. The upload queue implements this (wired
/// by the client runtime) so the matching image row moves `uploaded →
/// processing → processed` and its local blob is released.
#[async_trait]
pub trait ImageLifecycle: Send + Sync {
    /// A transaction referencing this image arrived from the server.
    async fn image_processed(&self, image: &ImageId);
}

/// Status of the sync engine.
///
/// Only `syncing` is non-re-entrant: a `full_sync` started while another
/// runs coalesces into the running one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never synced in this session.
    Idle,
    /// A sync round is running.
    Syncing,
    /// The last round finished cleanly.
    Success,
    /// The last round failed.
    Error {
        /// What went wrong.
        message: String,
    },
}

/// Errors from the engine's own storage. Transport failures are not errors
/// at this level — they queue work and surface in the report.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Local persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one sync round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// The round coalesced into an already-running one.
    pub coalesced: bool,
    /// Rows the server accepted.
    pub pushed: usize,
    /// Rows parked in the offline queue.
    pub queued: usize,
    /// Conflicted rows rebased and re-pushed.
    pub rebased: usize,
    /// Remote rows merged into the local table.
    pub pulled: usize,
    /// Local rows re-marked dirty because the server missed a push.
    pub remarked_dirty: usize,
    /// First transport failure of the round, if any.
    pub error: Option<String>,
}

struct EngineInner {
    user: UserId,
    local: Arc<dyn TransactionRepo>,
    transport: Arc<dyn SyncTransport>,
    monitor: NetworkMonitor,
    offline: OfflineQueue,
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    status: watch::Sender<SyncStatus>,
    image_hook: OnceLock<Arc<dyn ImageLifecycle>>,
}

/// Handle to the sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Assemble the engine over its capabilities.
    pub fn new(
        user: UserId,
        local: Arc<dyn TransactionRepo>,
        transport: Arc<dyn SyncTransport>,
        monitor: NetworkMonitor,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            inner: Arc::new(EngineInner {
                user,
                local,
                transport,
                monitor,
                offline: OfflineQueue::new(kv.clone()),
                kv,
                clock,
                status,
                image_hook: OnceLock::new(),
            }),
        }
    }

    /// Attach the image-lifecycle hook. Set once at process start; later
    /// calls are ignored.
    pub fn bind_image_lifecycle(&self, hook: Arc<dyn ImageLifecycle>) {
        let _ = self.inner.image_hook.set(hook);
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// The offline queue, shared with the engine.
    pub fn offline_queue(&self) -> &OfflineQueue {
        &self.inner.offline
    }

    // -- Push ------------------------------------------------------------

    /// Push all dirty rows.
    ///
    /// Offline, every row is parked in the offline queue instead. A
    /// transport failure before any response parks every row and reports
    /// the error; per-row rejections are handled individually — conflicts
    /// rebase onto the server row and re-push once.
    pub async fn sync_dirty(&self, trace: &TraceId) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let rows = self.inner.local.list_dirty(&self.inner.user).await?;
        if rows.is_empty() {
            return Ok(report);
        }

        if !self.inner.monitor.is_online() {
            let now = self.inner.clock.now();
            for row in rows {
                self.inner.offline.append(SyncAction::upsert(row, now)).await?;
                report.queued += 1;
            }
            return Ok(report);
        }

        let response = match self
            .inner
            .transport
            .push(&self.inner.user, rows.clone(), trace)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                // En-bloc failure: nothing reached the server. Park
                // everything for retry.
                let now = self.inner.clock.now();
                for row in rows {
                    self.inner.offline.append(SyncAction::upsert(row, now)).await?;
                    report.queued += 1;
                }
                report.error = Some(err.to_string());
                return Ok(report);
            }
        };

        for id in &response.accepted {
            self.clear_dirty(id).await?;
            report.pushed += 1;
        }

        let mut rebased = Vec::new();
        for rejection in response.rejected {
            match rejection.kind {
                ErrorKind::Conflict => {
                    let Some(server_row) = rejection.current else {
                        continue;
                    };
                    let Some(local_row) =
                        self.inner.local.get(&rejection.transaction_id).await?
                    else {
                        continue;
                    };
                    if local_row.dirty && local_row.updated_at > server_row.updated_at {
                        // Local edits win: continue from the server's
                        // version and re-submit.
                        let mut row = local_row;
                        row.rebase_onto(server_row.version, self.inner.clock.now());
                        self.inner.local.put(row.clone()).await?;
                        rebased.push(row);
                    } else {
                        let mut row = server_row;
                        row.dirty = false;
                        self.inner.local.put(row).await?;
                    }
                }
                ErrorKind::IdempotentDuplicate => {
                    self.clear_dirty(&rejection.transaction_id).await?;
                    report.pushed += 1;
                }
                _ => {
                    // Leave the row dirty; the next round retries it.
                    warn!(
                        transaction_id = %rejection.transaction_id,
                        kind = %rejection.kind,
                        "push rejection left for retry"
                    );
                }
            }
        }

        if !rebased.is_empty() {
            report.rebased = rebased.len();
            match self
                .inner
                .transport
                .push(&self.inner.user, rebased, trace)
                .await
            {
                Ok(second) => {
                    for id in &second.accepted {
                        self.clear_dirty(id).await?;
                        report.pushed += 1;
                    }
                }
                Err(err) => {
                    report.error.get_or_insert(err.to_string());
                }
            }
        }

        Ok(report)
    }

    async fn clear_dirty(&self, id: &TransactionId) -> Result<(), SyncError> {
        if let Some(mut row) = self.inner.local.get(id).await? {
            if row.dirty {
                row.dirty = false;
                self.inner.local.put(row).await?;
            }
        }
        Ok(())
    }

    // -- Pull ------------------------------------------------------------

    /// Pull rows written since the persisted cursor and version-merge them.
    ///
    /// Every returned row that names a source image also notifies the
    /// bound [`ImageLifecycle`]: a row's arrival is what advances the
    /// matching image to `processed` and releases its blob.
    pub async fn pull(&self, trace: &TraceId) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let cursor: Option<u64> = get_json(self.inner.kv.as_ref(), CURSOR_KEY).await?;

        let page = match self
            .inner
            .transport
            .pull(&self.inner.user, cursor, trace)
            .await
        {
            Ok(page) => page,
            Err(err) => {
                report.error = Some(err.to_string());
                return Ok(report);
            }
        };

        let mut processed_images: Vec<ImageId> = Vec::new();
        for remote in &page.transactions {
            if let Some(image) = &remote.image_id {
                if !processed_images.contains(image) {
                    processed_images.push(image.clone());
                }
            }
        }

        for remote in page.transactions {
            match self.inner.local.get(&remote.id).await? {
                None => {
                    let mut row = remote;
                    row.dirty = false;
                    self.inner.local.put(row).await?;
                    report.pulled += 1;
                }
                Some(local_row) => {
                    if remote.version > local_row.version {
                        let mut row = remote;
                        row.dirty = false;
                        self.inner.local.put(row).await?;
                        report.pulled += 1;
                    } else if remote.version < local_row.version {
                        // The server never saw our newer write: a lost
                        // push. Re-mark and leave local as-is.
                        if !local_row.dirty {
                            let mut row = local_row;
                            row.dirty = true;
                            self.inner.local.put(row).await?;
                        }
                        report.remarked_dirty += 1;
                    }
                    // Equal versions are a server echo; ignored.
                }
            }
        }

        put_json(self.inner.kv.as_ref(), CURSOR_KEY, &page.next_cursor).await?;

        if let Some(hook) = self.inner.image_hook.get() {
            for image in &processed_images {
                hook.image_processed(image).await;
            }
        }
        Ok(report)
    }

    // -- Full sync -------------------------------------------------------

    /// Push-then-pull. Pull errors are reported but never revert pushed
    /// state. Re-entrant calls coalesce.
    pub async fn full_sync(&self, trace: &TraceId) -> Result<SyncReport, SyncError> {
        let mut entered = false;
        self.inner.status.send_if_modified(|status| {
            if matches!(status, SyncStatus::Syncing) {
                false
            } else {
                entered = true;
                *status = SyncStatus::Syncing;
                true
            }
        });
        if !entered {
            return Ok(SyncReport {
                coalesced: true,
                ..Default::default()
            });
        }

        TelemetryEvent::new(EventName::SyncStarted, trace.clone())
            .user(self.inner.user.clone())
            .emit();

        let push = self.sync_dirty(trace).await;
        let pull = match &push {
            Ok(_) => self.pull(trace).await,
            Err(_) => Ok(SyncReport::default()),
        };

        let mut report = match (push, pull) {
            (Ok(push), Ok(pull)) => SyncReport {
                coalesced: false,
                pushed: push.pushed,
                queued: push.queued,
                rebased: push.rebased,
                pulled: pull.pulled,
                remarked_dirty: pull.remarked_dirty,
                error: push.error.or(pull.error),
            },
            (Err(err), _) | (_, Err(err)) => {
                self.finish(Err(err.to_string()), trace).await?;
                return Err(err);
            }
        };

        if report.error.is_none() && report.queued > 0 {
            report.error = Some("rows queued while offline".into());
        }
        let outcome = match &report.error {
            None => Ok(()),
            Some(message) => Err(message.clone()),
        };
        self.finish(outcome, trace).await?;
        Ok(report)
    }

    async fn finish(
        &self,
        outcome: Result<(), String>,
        trace: &TraceId,
    ) -> Result<(), SyncError> {
        match outcome {
            Ok(()) => {
                let now = self.inner.clock.now();
                put_json(self.inner.kv.as_ref(), LAST_SYNCED_KEY, &now).await?;
                // Everything dirty was either pushed or re-queued; parked
                // actions from this round are superseded.
                self.inner.offline.drain().await?;
                self.inner.status.send_replace(SyncStatus::Success);
                TelemetryEvent::new(EventName::SyncCompleted, trace.clone())
                    .user(self.inner.user.clone())
                    .emit();
            }
            Err(message) => {
                self.inner
                    .status
                    .send_replace(SyncStatus::Error {
                        message: message.clone(),
                    });
                TelemetryEvent::new(EventName::SyncFailed, trace.clone())
                    .level(EventLevel::Warn)
                    .user(self.inner.user.clone())
                    .field("message", message)
                    .emit();
            }
        }
        Ok(())
    }

    // -- Auto-sync -------------------------------------------------------

    /// When the engine last finished a successful round.
    pub async fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        Ok(get_json(self.inner.kv.as_ref(), LAST_SYNCED_KEY).await?)
    }

    /// Run a full sync if none has succeeded yet, or the last success is
    /// stale. Called at startup and periodically.
    pub async fn maybe_auto_sync(&self) -> Result<Option<SyncReport>, SyncError> {
        let now = self.inner.clock.now();
        let due = match self.last_synced_at().await? {
            None => true,
            Some(last) => (now - last).num_seconds() > AUTO_SYNC_STALE_SECS,
        };
        if !due {
            return Ok(None);
        }
        let trace = TraceId::random();
        self.full_sync(&trace).await.map(Some)
    }

    /// Trigger a full sync on every offline→online edge.
    ///
    /// The returned guard owns the subscription and the drain task; drop it
    /// to tear both down.
    pub fn spawn_reconnect_drain(&self) -> ReconnectGuard {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.inner.monitor.subscribe(move |online| {
            if online {
                let _ = tx.send(());
            }
        });
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let trace = TraceId::random();
                if let Err(err) = engine.full_sync(&trace).await {
                    warn!(error = %err, "reconnect sync failed");
                }
            }
        });
        ReconnectGuard {
            _subscription: subscription,
            handle,
        }
    }
}

/// Keeps the reconnect-drain subscription and task alive.
pub struct ReconnectGuard {
    _subscription: Subscription,
    handle: JoinHandle<()>,
}

impl ReconnectGuard {
    /// Abort the drain task (the subscription dies with the guard).
    pub fn shutdown(self) {
        self.handle.abort();
    }
}
