// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transaction rows shared by the local store and the cloud table.

use crate::id::{ImageId, TransactionId, UserId};
use crate::money::{Currency, Money};
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Money in.
    Income,
    /// Money out.
    Expense,
}

/// Review status of a transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Extracted but not yet confirmed by the user.
    Unconfirmed,
    /// Confirmed by the user.
    Confirmed,
    /// Soft-deleted.
    Deleted,
    /// Extraction failed schema validation; needs human repair.
    NeedsReview,
}

/// Closed spending category vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Supermarkets and food shops.
    Groceries,
    /// Restaurants, cafes, delivery.
    Dining,
    /// Trains, buses, fuel, parking.
    Transport,
    /// Power, water, phone, internet.
    Utilities,
    /// Pharmacies, clinics.
    Health,
    /// Cinema, games, books.
    Entertainment,
    /// General retail.
    Shopping,
    /// Hotels and travel fare.
    Travel,
    /// Salary and other income.
    Income,
    /// Everything else.
    Other,
}

impl Category {
    /// All categories, for schema enumeration.
    pub const ALL: &'static [Category] = &[
        Category::Groceries,
        Category::Dining,
        Category::Transport,
        Category::Utilities,
        Category::Health,
        Category::Entertainment,
        Category::Shopping,
        Category::Travel,
        Category::Income,
        Category::Other,
    ];

    /// Stable string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groceries => "groceries",
            Self::Dining => "dining",
            Self::Transport => "transport",
            Self::Utilities => "utilities",
            Self::Health => "health",
            Self::Entertainment => "entertainment",
            Self::Shopping => "shopping",
            Self::Travel => "travel",
            Self::Income => "income",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// One transaction row.
///
/// `version` is a single monotonically-increasing integer; the server is the
/// arbiter. `dirty` is a local-only flag marking rows that await a push and
/// never crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Stable id (see [`TransactionId`] constructors).
    pub id: TransactionId,
    /// Partitioning key.
    pub user_id: UserId,
    /// Source image; `None` for manual entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<ImageId>,
    /// Amount in minor units.
    pub amount: Money,
    /// Currency of `amount`.
    #[serde(default)]
    pub currency: Currency,
    /// Income or expense.
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Transaction date (server-side local-zone derivation).
    pub date: NaiveDate,
    /// Merchant name as extracted or entered.
    pub merchant: String,
    /// Spending category.
    pub category: Category,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Review status.
    pub status: TransactionStatus,
    /// Monotonic version; incremented on every write.
    pub version: u64,
    /// Local-only: pending push.
    #[serde(skip)]
    pub dirty: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Set when the user confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Row TTL in epoch seconds. Guest rows only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    /// Validation errors attached when the row landed in `needs_review`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_notes: Vec<String>,
}

impl Transaction {
    /// Apply a local edit: bump the version, mark dirty, stamp `updated_at`.
    pub fn apply_local_edit(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.dirty = true;
        self.updated_at = now;
    }

    /// Rebase a locally-edited row on top of the server's version after a
    /// push conflict: local edits win, but the version continues from the
    /// server's.
    pub fn rebase_onto(&mut self, server_version: u64, now: DateTime<Utc>) {
        self.version = server_version + 1;
        self.dirty = true;
        self.updated_at = now;
    }

    /// Confirm the row.
    pub fn confirm(&mut self, now: DateTime<Utc>) {
        self.status = TransactionStatus::Confirmed;
        self.confirmed_at = Some(now);
        self.apply_local_edit(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        let now = Utc::now();
        Transaction {
            id: TransactionId::new("tx-1-a.jpg").unwrap(),
            user_id: UserId::new("device-abc").unwrap(),
            image_id: Some(ImageId::new("1-a.jpg").unwrap()),
            amount: Money::from_minor(1980),
            currency: Currency::Jpy,
            tx_type: TransactionType::Expense,
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            merchant: "Seven Eleven".into(),
            category: Category::Groceries,
            description: String::new(),
            status: TransactionStatus::Unconfirmed,
            version: 1,
            dirty: false,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            ttl: None,
            review_notes: Vec::new(),
        }
    }

    #[test]
    fn local_edit_bumps_version_and_dirties() {
        let mut tx = sample();
        tx.apply_local_edit(Utc::now());
        assert_eq!(tx.version, 2);
        assert!(tx.dirty);
    }

    #[test]
    fn rebase_continues_from_server_version() {
        let mut tx = sample();
        tx.apply_local_edit(Utc::now()); // local version 2
        tx.rebase_onto(4, Utc::now());
        assert_eq!(tx.version, 5);
        assert!(tx.dirty);
    }

    #[test]
    fn confirm_sets_status_and_timestamp() {
        let mut tx = sample();
        tx.confirm(Utc::now());
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert!(tx.confirmed_at.is_some());
        assert!(tx.dirty);
    }

    #[test]
    fn dirty_flag_never_crosses_the_wire() {
        let mut tx = sample();
        tx.dirty = true;
        let json = serde_json::to_value(&tx).unwrap();
        assert!(json.get("dirty").is_none());
        let back: Transaction = serde_json::from_value(json).unwrap();
        assert!(!back.dirty);
    }

    #[test]
    fn type_field_uses_wire_name() {
        let tx = sample();
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "expense");
    }

    #[test]
    fn category_vocabulary_is_closed() {
        for c in Category::ALL {
            let json = serde_json::to_string(c).unwrap();
            assert_eq!(json, format!("\"{}\"", c.as_str()));
        }
        assert!(serde_json::from_str::<Category>("\"gadgets\"").is_err());
    }
}
