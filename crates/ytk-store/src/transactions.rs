// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transaction repository.
//!
//! The same capability serves two deployments: the client's local table
//! (dirty flags, unconditional writes) and the cloud table (conditional
//! inserts, optimistic version checks, change cursor). The conditional
//! operations model the document store's `attribute_not_exists(pk)` insert
//! and version-guarded update.

use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use ytk_core::{Transaction, TransactionId, UserId};

/// Outcome of a version-guarded write.
#[derive(Debug, Clone)]
pub enum VersionedPut {
    /// The write was applied.
    Applied,
    /// The stored version differed; here is the current row.
    Conflict(Transaction),
}

/// Transaction rows, keyed by [`TransactionId`].
#[async_trait]
pub trait TransactionRepo: Send + Sync {
    /// Insert only if no row with this id exists. Returns `false` (and
    /// leaves the stored row untouched) on a duplicate.
    async fn insert_if_absent(&self, row: Transaction) -> Result<bool>;

    /// Fetch one row.
    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>>;

    /// Unconditional write (local-table semantics).
    async fn put(&self, row: Transaction) -> Result<()>;

    /// Write only if the stored version equals `expected_version`; absent
    /// rows are treated as version 0.
    async fn put_versioned(&self, row: Transaction, expected_version: u64)
    -> Result<VersionedPut>;

    /// All rows for a user.
    async fn list(&self, user: &UserId) -> Result<Vec<Transaction>>;

    /// Rows for a user with the dirty flag set (local-table semantics).
    async fn list_dirty(&self, user: &UserId) -> Result<Vec<Transaction>>;

    /// Rows for a user written after `cursor`, in write order, together
    /// with the cursor to resume from.
    async fn changed_since(
        &self,
        user: &UserId,
        cursor: Option<u64>,
    ) -> Result<(Vec<Transaction>, u64)>;

    /// Delete every row for a user, returning the count.
    async fn remove_user(&self, user: &UserId) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// MemoryTransactionRepo
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TableInner {
    rows: BTreeMap<TransactionId, (Transaction, u64)>,
    write_seq: u64,
}

/// In-memory [`TransactionRepo`]. Clones share the same table.
#[derive(Clone, Default)]
pub struct MemoryTransactionRepo {
    inner: Arc<Mutex<TableInner>>,
}

impl MemoryTransactionRepo {
    /// New empty table.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepo for MemoryTransactionRepo {
    async fn insert_if_absent(&self, row: Transaction) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        if guard.rows.contains_key(&row.id) {
            return Ok(false);
        }
        guard.write_seq += 1;
        let seq = guard.write_seq;
        guard.rows.insert(row.id.clone(), (row, seq));
        Ok(true)
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        Ok(self.inner.lock().await.rows.get(id).map(|(row, _)| row.clone()))
    }

    async fn put(&self, row: Transaction) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.write_seq += 1;
        let seq = guard.write_seq;
        guard.rows.insert(row.id.clone(), (row, seq));
        Ok(())
    }

    async fn put_versioned(
        &self,
        row: Transaction,
        expected_version: u64,
    ) -> Result<VersionedPut> {
        let mut guard = self.inner.lock().await;
        let stored_version = guard.rows.get(&row.id).map(|(r, _)| r.version).unwrap_or(0);
        if stored_version != expected_version {
            let current = guard
                .rows
                .get(&row.id)
                .map(|(r, _)| r.clone())
                .unwrap_or_else(|| row.clone());
            return Ok(VersionedPut::Conflict(current));
        }
        guard.write_seq += 1;
        let seq = guard.write_seq;
        guard.rows.insert(row.id.clone(), (row, seq));
        Ok(VersionedPut::Applied)
    }

    async fn list(&self, user: &UserId) -> Result<Vec<Transaction>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .rows
            .values()
            .filter(|(row, _)| &row.user_id == user)
            .map(|(row, _)| row.clone())
            .collect())
    }

    async fn list_dirty(&self, user: &UserId) -> Result<Vec<Transaction>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .rows
            .values()
            .filter(|(row, _)| &row.user_id == user && row.dirty)
            .map(|(row, _)| row.clone())
            .collect())
    }

    async fn changed_since(
        &self,
        user: &UserId,
        cursor: Option<u64>,
    ) -> Result<(Vec<Transaction>, u64)> {
        let guard = self.inner.lock().await;
        let floor = cursor.unwrap_or(0);
        let mut changed: Vec<(u64, Transaction)> = guard
            .rows
            .values()
            .filter(|(row, seq)| &row.user_id == user && *seq > floor)
            .map(|(row, seq)| (*seq, row.clone()))
            .collect();
        changed.sort_by_key(|(seq, _)| *seq);
        let next_cursor = changed.last().map(|(seq, _)| *seq).unwrap_or(floor);
        Ok((changed.into_iter().map(|(_, row)| row).collect(), next_cursor))
    }

    async fn remove_user(&self, user: &UserId) -> Result<u64> {
        let mut guard = self.inner.lock().await;
        let doomed: Vec<TransactionId> = guard
            .rows
            .values()
            .filter(|(row, _)| &row.user_id == user)
            .map(|(row, _)| row.id.clone())
            .collect();
        let count = doomed.len() as u64;
        for id in doomed {
            guard.rows.remove(&id);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use ytk_core::{Category, Currency, Money, TransactionStatus, TransactionType};

    fn tx(id: &str, user: &str, version: u64) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: TransactionId::new(id).unwrap(),
            user_id: UserId::new(user).unwrap(),
            image_id: None,
            amount: Money::from_minor(500),
            currency: Currency::Jpy,
            tx_type: TransactionType::Expense,
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            merchant: "Lawson".into(),
            category: Category::Groceries,
            description: String::new(),
            status: TransactionStatus::Unconfirmed,
            version,
            dirty: false,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            ttl: None,
            review_notes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn conditional_insert_is_idempotent() {
        let repo = MemoryTransactionRepo::new();
        assert!(repo.insert_if_absent(tx("t1", "u1", 1)).await.unwrap());
        // Second arrival is a no-op and does not clobber the stored row.
        let mut second = tx("t1", "u1", 1);
        second.merchant = "Different".into();
        assert!(!repo.insert_if_absent(second).await.unwrap());
        let stored = repo.get(&TransactionId::new("t1").unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.merchant, "Lawson");
    }

    #[tokio::test]
    async fn versioned_put_applies_on_match() {
        let repo = MemoryTransactionRepo::new();
        repo.put(tx("t1", "u1", 3)).await.unwrap();
        let outcome = repo.put_versioned(tx("t1", "u1", 4), 3).await.unwrap();
        assert!(matches!(outcome, VersionedPut::Applied));
        let stored = repo.get(&TransactionId::new("t1").unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.version, 4);
    }

    #[tokio::test]
    async fn versioned_put_conflicts_return_current_row() {
        let repo = MemoryTransactionRepo::new();
        repo.put(tx("t1", "u1", 4)).await.unwrap();
        let outcome = repo.put_versioned(tx("t1", "u1", 4), 3).await.unwrap();
        match outcome {
            VersionedPut::Conflict(current) => assert_eq!(current.version, 4),
            VersionedPut::Applied => panic!("stale write must conflict"),
        }
    }

    #[tokio::test]
    async fn absent_row_is_version_zero() {
        let repo = MemoryTransactionRepo::new();
        let outcome = repo.put_versioned(tx("t1", "u1", 1), 0).await.unwrap();
        assert!(matches!(outcome, VersionedPut::Applied));
    }

    #[tokio::test]
    async fn cursor_walks_write_order() {
        let repo = MemoryTransactionRepo::new();
        let user = UserId::new("u1").unwrap();
        repo.put(tx("t1", "u1", 1)).await.unwrap();
        repo.put(tx("t2", "u1", 1)).await.unwrap();

        let (page, cursor) = repo.changed_since(&user, None).await.unwrap();
        assert_eq!(page.len(), 2);

        // Nothing new: empty page, cursor unchanged.
        let (empty, same) = repo.changed_since(&user, Some(cursor)).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(same, cursor);

        // A rewrite of t1 shows up after the cursor.
        repo.put(tx("t1", "u1", 2)).await.unwrap();
        let (page, _) = repo.changed_since(&user, Some(cursor)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id.as_str(), "t1");
        assert_eq!(page[0].version, 2);
    }

    #[tokio::test]
    async fn remove_user_counts() {
        let repo = MemoryTransactionRepo::new();
        repo.put(tx("t1", "u1", 1)).await.unwrap();
        repo.put(tx("t2", "u1", 1)).await.unwrap();
        repo.put(tx("t3", "u2", 1)).await.unwrap();
        assert_eq!(repo.remove_user(&UserId::new("u1").unwrap()).await.unwrap(), 2);
        assert_eq!(repo.list(&UserId::new("u2").unwrap()).await.unwrap().len(), 1);
    }
}
