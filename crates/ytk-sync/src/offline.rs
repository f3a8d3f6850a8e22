// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted offline queue.
//!
//! When a push cannot reach the server, each dirty row is parked here as a
//! [`SyncAction`]. The queue deduplicates by action id — re-queueing the
//! same failed push is a no-op — and survives restarts through the KV
//! store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ytk_core::{Transaction, TransactionId};
use ytk_store::{KvStore, StoreError, get_json, put_json};

const QUEUE_KEY: &str = "sync/offline-queue";

/// What the parked action would have done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncActionKind {
    /// Create or update the row server-side.
    Upsert,
    /// Soft-delete the row server-side.
    Delete,
}

/// One parked push, keyed by a deterministic action id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAction {
    /// Idempotency key: stable per `(transaction, version)`.
    pub id: String,
    /// Operation kind.
    pub kind: SyncActionKind,
    /// Affected transaction.
    pub transaction_id: TransactionId,
    /// When the action was parked.
    pub timestamp: DateTime<Utc>,
    /// The row as it should be pushed.
    pub payload: Transaction,
}

impl SyncAction {
    /// Build an upsert action for a dirty row.
    pub fn upsert(row: Transaction, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}@{}", row.id, row.version),
            kind: if row.status == ytk_core::TransactionStatus::Deleted {
                SyncActionKind::Delete
            } else {
                SyncActionKind::Upsert
            },
            transaction_id: row.id.clone(),
            timestamp: now,
            payload: row,
        }
    }
}

/// KV-persisted offline queue.
#[derive(Clone)]
pub struct OfflineQueue {
    kv: Arc<dyn KvStore>,
}

impl OfflineQueue {
    /// New queue over the device KV store.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn load(&self) -> Result<Vec<SyncAction>, StoreError> {
        Ok(get_json(self.kv.as_ref(), QUEUE_KEY).await?.unwrap_or_default())
    }

    async fn store(&self, actions: &Vec<SyncAction>) -> Result<(), StoreError> {
        put_json(self.kv.as_ref(), QUEUE_KEY, actions).await
    }

    /// Park an action. Duplicate ids are dropped silently.
    pub async fn append(&self, action: SyncAction) -> Result<(), StoreError> {
        let mut actions = self.load().await?;
        if actions.iter().any(|a| a.id == action.id) {
            return Ok(());
        }
        actions.push(action);
        self.store(&actions).await
    }

    /// All parked actions, oldest first.
    pub async fn list(&self) -> Result<Vec<SyncAction>, StoreError> {
        self.load().await
    }

    /// Number of parked actions.
    pub async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.load().await?.len())
    }

    /// Returns `true` when nothing is parked.
    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.load().await?.is_empty())
    }

    /// Remove every parked action, returning what was there.
    pub async fn drain(&self) -> Result<Vec<SyncAction>, StoreError> {
        let actions = self.load().await?;
        if !actions.is_empty() {
            self.kv.remove(QUEUE_KEY).await?;
        }
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ytk_core::{
        Category, Currency, Money, TransactionStatus, TransactionType, UserId,
    };
    use ytk_store::MemoryKvStore;

    fn tx(id: &str, version: u64) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: TransactionId::new(id).unwrap(),
            user_id: UserId::new("device-abc").unwrap(),
            image_id: None,
            amount: Money::from_minor(100),
            currency: Currency::Jpy,
            tx_type: TransactionType::Expense,
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            merchant: "m".into(),
            category: Category::Other,
            description: String::new(),
            status: TransactionStatus::Unconfirmed,
            version,
            dirty: true,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            ttl: None,
            review_notes: Vec::new(),
        }
    }

    fn queue() -> OfflineQueue {
        OfflineQueue::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn append_deduplicates_by_id() {
        let queue = queue();
        let action = SyncAction::upsert(tx("t1", 2), Utc::now());
        queue.append(action.clone()).await.unwrap();
        queue.append(action).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);

        // Same row at a later version is a different action.
        queue
            .append(SyncAction::upsert(tx("t1", 3), Utc::now()))
            .await
            .unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn drain_empties_the_queue() {
        let queue = queue();
        queue
            .append(SyncAction::upsert(tx("t1", 1), Utc::now()))
            .await
            .unwrap();
        let drained = queue.drain().await.unwrap();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn deleted_rows_park_as_delete_actions() {
        let mut row = tx("t1", 1);
        row.status = TransactionStatus::Deleted;
        let action = SyncAction::upsert(row, Utc::now());
        assert_eq!(action.kind, SyncActionKind::Delete);
    }

    #[tokio::test]
    async fn queue_survives_reload() {
        let kv = Arc::new(MemoryKvStore::new());
        let queue = OfflineQueue::new(kv.clone());
        queue
            .append(SyncAction::upsert(tx("t1", 1), Utc::now()))
            .await
            .unwrap();

        let reopened = OfflineQueue::new(kv);
        assert_eq!(reopened.len().await.unwrap(), 1);
    }
}
