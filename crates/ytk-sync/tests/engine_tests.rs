// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the sync engine.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use ytk_core::{
    Category, Currency, ErrorKind, Money, TraceId, Transaction, TransactionId, TransactionStatus,
    TransactionType, TransportError, UserId,
};
use ytk_store::{
    Clock, FixedClock, MemoryKvStore, MemoryTransactionRepo, TransactionRepo, VersionedPut,
};
use ytk_core::ImageId;
use ytk_sync::{ImageLifecycle, NetworkMonitor, PullPage, PushRejection, PushResponse, SyncEngine,
    SyncStatus, SyncTransport};

// ---------------------------------------------------------------------------
// Scripted transport backed by a real server-side repo
// ---------------------------------------------------------------------------

/// Transport that applies pushes to a server-side [`MemoryTransactionRepo`]
/// with the gateway's version rule: a write is accepted only when the
/// incoming version is exactly one above the stored version.
struct RepoTransport {
    server: MemoryTransactionRepo,
    fail_next_push: Mutex<Option<TransportError>>,
    fail_next_pull: Mutex<Option<TransportError>>,
    push_calls: AtomicU32,
}

impl RepoTransport {
    fn new(server: MemoryTransactionRepo) -> Self {
        Self {
            server,
            fail_next_push: Mutex::new(None),
            fail_next_pull: Mutex::new(None),
            push_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SyncTransport for RepoTransport {
    async fn push(
        &self,
        user: &UserId,
        batch: Vec<Transaction>,
        _trace: &TraceId,
    ) -> Result<PushResponse, TransportError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_next_push.lock().await.take() {
            return Err(err);
        }
        let mut response = PushResponse::default();
        for row in batch {
            assert_eq!(&row.user_id, user);
            let expected = row.version.saturating_sub(1);
            match self.server.put_versioned(row.clone(), expected).await.unwrap() {
                VersionedPut::Applied => response.accepted.push(row.id),
                VersionedPut::Conflict(current) => response.rejected.push(PushRejection {
                    transaction_id: row.id,
                    kind: ErrorKind::Conflict,
                    current: Some(current),
                }),
            }
        }
        Ok(response)
    }

    async fn pull(
        &self,
        user: &UserId,
        since: Option<u64>,
        _trace: &TraceId,
    ) -> Result<PullPage, TransportError> {
        if let Some(err) = self.fail_next_pull.lock().await.take() {
            return Err(err);
        }
        let (transactions, next_cursor) = self.server.changed_since(user, since).await.unwrap();
        Ok(PullPage {
            transactions,
            next_cursor,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn user() -> UserId {
    UserId::new("device-abc").unwrap()
}

fn tx(id: &str, version: u64, dirty: bool, clock: &FixedClock) -> Transaction {
    let now = clock.now();
    Transaction {
        id: TransactionId::new(id).unwrap(),
        user_id: user(),
        image_id: None,
        amount: Money::from_minor(1980),
        currency: Currency::Jpy,
        tx_type: TransactionType::Expense,
        date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
        merchant: "Lawson".into(),
        category: Category::Groceries,
        description: String::new(),
        status: TransactionStatus::Unconfirmed,
        version,
        dirty,
        created_at: now,
        updated_at: now,
        confirmed_at: None,
        ttl: None,
        review_notes: Vec::new(),
    }
}

struct Rig {
    engine: SyncEngine,
    local: MemoryTransactionRepo,
    server: MemoryTransactionRepo,
    transport: Arc<RepoTransport>,
    monitor: NetworkMonitor,
    clock: FixedClock,
}

fn rig() -> Rig {
    let local = MemoryTransactionRepo::new();
    let server = MemoryTransactionRepo::new();
    let transport = Arc::new(RepoTransport::new(server.clone()));
    let monitor = NetworkMonitor::new();
    let kv = Arc::new(MemoryKvStore::new());
    let clock = FixedClock::at("2026-01-15T03:00:00Z".parse().unwrap());
    let engine = SyncEngine::new(
        user(),
        Arc::new(local.clone()),
        transport.clone(),
        monitor.clone(),
        kv,
        Arc::new(clock.clone()),
    );
    Rig {
        engine,
        local,
        server,
        transport,
        monitor,
        clock,
    }
}

fn trace() -> TraceId {
    TraceId::new("trace-sync").unwrap()
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_clears_dirty_flags() {
    let rig = rig();
    rig.local.put(tx("t1", 1, true, &rig.clock)).await.unwrap();
    rig.local.put(tx("t2", 1, true, &rig.clock)).await.unwrap();

    let report = rig.engine.sync_dirty(&trace()).await.unwrap();
    assert_eq!(report.pushed, 2);
    assert_eq!(report.queued, 0);
    assert!(rig.local.list_dirty(&user()).await.unwrap().is_empty());
    assert!(rig.server.get(&TransactionId::new("t1").unwrap()).await.unwrap().is_some());
}

#[tokio::test]
async fn sync_dirty_twice_is_idempotent() {
    let rig = rig();
    rig.local.put(tx("t1", 1, true, &rig.clock)).await.unwrap();

    let first = rig.engine.sync_dirty(&trace()).await.unwrap();
    let second = rig.engine.sync_dirty(&trace()).await.unwrap();
    assert_eq!(first.pushed, 1);
    assert_eq!(second.pushed, 0);
    assert_eq!(rig.transport.push_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn offline_push_parks_rows() {
    let rig = rig();
    rig.monitor.set_online(false);
    rig.local.put(tx("t1", 1, true, &rig.clock)).await.unwrap();

    let report = rig.engine.sync_dirty(&trace()).await.unwrap();
    assert_eq!(report.pushed, 0);
    assert_eq!(report.queued, 1);
    assert_eq!(rig.engine.offline_queue().len().await.unwrap(), 1);
    // The row stays dirty for the reconnect drain.
    assert_eq!(rig.local.list_dirty(&user()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn en_bloc_transport_failure_parks_everything() {
    let rig = rig();
    rig.local.put(tx("t1", 1, true, &rig.clock)).await.unwrap();
    *rig.transport.fail_next_push.lock().await =
        Some(TransportError::Network("reset".into()));

    let report = rig.engine.sync_dirty(&trace()).await.unwrap();
    assert_eq!(report.queued, 1);
    assert!(report.error.is_some());
    assert_eq!(rig.engine.offline_queue().len().await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Conflict rebase: local v3 dirty vs server v4
// ---------------------------------------------------------------------------

#[tokio::test]
async fn version_conflict_rebases_and_repushes() {
    let rig = rig();
    // Server holds version 4, written a while ago.
    let mut server_row = tx("t1", 4, false, &rig.clock);
    server_row.merchant = "Server Mart".into();
    server_row.updated_at = rig.clock.now() - Duration::hours(1);
    rig.server.put(server_row).await.unwrap();

    // Local holds a dirty version 3 with a fresher edit.
    let mut local_row = tx("t1", 3, true, &rig.clock);
    local_row.merchant = "Local Kiosk".into();
    rig.local.put(local_row).await.unwrap();

    let report = rig.engine.sync_dirty(&trace()).await.unwrap();
    assert_eq!(report.rebased, 1);
    assert_eq!(report.pushed, 1);

    // The rebased row landed server-side at version 5 with the local edit.
    let server_row = rig
        .server
        .get(&TransactionId::new("t1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server_row.version, 5);
    assert_eq!(server_row.merchant, "Local Kiosk");
    assert!(rig.local.list_dirty(&user()).await.unwrap().is_empty());
}

#[tokio::test]
async fn conflict_with_stale_local_accepts_server_row() {
    let rig = rig();
    let mut server_row = tx("t1", 4, false, &rig.clock);
    server_row.merchant = "Server Mart".into();
    rig.server.put(server_row).await.unwrap();

    // Local dirty edit is older than the server's write.
    let mut local_row = tx("t1", 3, true, &rig.clock);
    local_row.updated_at = rig.clock.now() - Duration::hours(2);
    rig.local.put(local_row).await.unwrap();

    let report = rig.engine.sync_dirty(&trace()).await.unwrap();
    assert_eq!(report.rebased, 0);
    let merged = rig
        .local
        .get(&TransactionId::new("t1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(merged.version, 4);
    assert_eq!(merged.merchant, "Server Mart");
    assert!(!merged.dirty);
}

// ---------------------------------------------------------------------------
// Pull & version merge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pull_merges_by_version() {
    let rig = rig();
    // Local: v2 clean. Server: v3 (newer), plus a brand-new row.
    rig.local.put(tx("t1", 2, false, &rig.clock)).await.unwrap();
    let mut newer = tx("t1", 3, false, &rig.clock);
    newer.merchant = "Updated".into();
    rig.server.put(newer).await.unwrap();
    rig.server.put(tx("t2", 1, false, &rig.clock)).await.unwrap();

    let report = rig.engine.pull(&trace()).await.unwrap();
    assert_eq!(report.pulled, 2);

    let t1 = rig.local.get(&TransactionId::new("t1").unwrap()).await.unwrap().unwrap();
    assert_eq!(t1.version, 3);
    assert_eq!(t1.merchant, "Updated");
    assert!(rig.local.get(&TransactionId::new("t2").unwrap()).await.unwrap().is_some());
}

#[tokio::test]
async fn pull_ignores_server_echo() {
    let rig = rig();
    rig.local.put(tx("t1", 3, false, &rig.clock)).await.unwrap();
    rig.server.put(tx("t1", 3, false, &rig.clock)).await.unwrap();

    let report = rig.engine.pull(&trace()).await.unwrap();
    assert_eq!(report.pulled, 0);
    assert_eq!(report.remarked_dirty, 0);
}

#[tokio::test]
async fn pull_remarks_dirty_on_lost_push() {
    let rig = rig();
    // Local is ahead of the server: our push never landed.
    rig.local.put(tx("t1", 5, false, &rig.clock)).await.unwrap();
    rig.server.put(tx("t1", 4, false, &rig.clock)).await.unwrap();

    let report = rig.engine.pull(&trace()).await.unwrap();
    assert_eq!(report.remarked_dirty, 1);
    let row = rig.local.get(&TransactionId::new("t1").unwrap()).await.unwrap().unwrap();
    assert_eq!(row.version, 5);
    assert!(row.dirty);
}

/// Lifecycle hook that records every notified image id.
#[derive(Default)]
struct RecordingLifecycle {
    seen: Mutex<Vec<ImageId>>,
}

#[async_trait]
impl ImageLifecycle for RecordingLifecycle {
    async fn image_processed(&self, image: &ImageId) {
        self.seen.lock().await.push(image.clone());
    }
}

#[tokio::test]
async fn pull_notifies_the_image_lifecycle() {
    let rig = rig();
    let hook = Arc::new(RecordingLifecycle::default());
    rig.engine.bind_image_lifecycle(hook.clone());

    let image = ImageId::new("1738000000000-receipt").unwrap();
    let mut with_image = tx("t1", 1, false, &rig.clock);
    with_image.image_id = Some(image.clone());
    rig.server.put(with_image).await.unwrap();
    // A manual entry without a source image is not notified.
    rig.server.put(tx("t2", 1, false, &rig.clock)).await.unwrap();

    rig.engine.pull(&trace()).await.unwrap();
    assert_eq!(*hook.seen.lock().await, vec![image.clone()]);

    // Nothing new on the next pull: no repeat notification.
    rig.engine.pull(&trace()).await.unwrap();
    assert_eq!(hook.seen.lock().await.len(), 1);
}

#[tokio::test]
async fn pull_cursor_advances() {
    let rig = rig();
    rig.server.put(tx("t1", 1, false, &rig.clock)).await.unwrap();
    rig.engine.pull(&trace()).await.unwrap();

    // Nothing new: second pull merges nothing.
    let report = rig.engine.pull(&trace()).await.unwrap();
    assert_eq!(report.pulled, 0);

    rig.server.put(tx("t2", 1, false, &rig.clock)).await.unwrap();
    let report = rig.engine.pull(&trace()).await.unwrap();
    assert_eq!(report.pulled, 1);
}

// ---------------------------------------------------------------------------
// Full sync & status FSM
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_sync_reaches_success_and_stamps_time() {
    let rig = rig();
    rig.local.put(tx("t1", 1, true, &rig.clock)).await.unwrap();

    let report = rig.engine.full_sync(&trace()).await.unwrap();
    assert!(!report.coalesced);
    assert_eq!(report.pushed, 1);
    assert_eq!(rig.engine.status(), SyncStatus::Success);
    assert!(rig.engine.last_synced_at().await.unwrap().is_some());
}

#[tokio::test]
async fn pull_error_reports_but_keeps_pushed_state() {
    let rig = rig();
    rig.local.put(tx("t1", 1, true, &rig.clock)).await.unwrap();
    *rig.transport.fail_next_pull.lock().await = Some(TransportError::Timeout);

    let report = rig.engine.full_sync(&trace()).await.unwrap();
    assert_eq!(report.pushed, 1);
    assert!(report.error.is_some());
    assert!(matches!(rig.engine.status(), SyncStatus::Error { .. }));
    // The push survived the pull failure.
    assert!(rig.server.get(&TransactionId::new("t1").unwrap()).await.unwrap().is_some());
    assert!(rig.local.list_dirty(&user()).await.unwrap().is_empty());
}

#[tokio::test]
async fn reconnect_edge_triggers_drain() {
    let rig = rig();
    rig.monitor.set_online(false);
    rig.local.put(tx("t1", 1, true, &rig.clock)).await.unwrap();
    rig.engine.sync_dirty(&trace()).await.unwrap();
    assert_eq!(rig.engine.offline_queue().len().await.unwrap(), 1);

    let guard = rig.engine.spawn_reconnect_drain();
    rig.monitor.set_online(true);

    // Let the drain task run.
    for _ in 0..10 {
        tokio::task::yield_now().await;
        if rig.engine.status() == SyncStatus::Success {
            break;
        }
    }
    assert_eq!(rig.engine.status(), SyncStatus::Success);
    assert!(rig.engine.offline_queue().is_empty().await.unwrap());
    assert!(rig.server.get(&TransactionId::new("t1").unwrap()).await.unwrap().is_some());
    guard.shutdown();
}

// ---------------------------------------------------------------------------
// Auto-sync staleness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_sync_runs_when_never_synced() {
    let rig = rig();
    assert!(rig.engine.maybe_auto_sync().await.unwrap().is_some());
}

#[tokio::test]
async fn auto_sync_skips_when_fresh_and_runs_when_stale() {
    let rig = rig();
    rig.engine.full_sync(&trace()).await.unwrap();
    assert!(rig.engine.maybe_auto_sync().await.unwrap().is_none());

    rig.clock.advance(Duration::minutes(6));
    assert!(rig.engine.maybe_auto_sync().await.unwrap().is_some());
}
