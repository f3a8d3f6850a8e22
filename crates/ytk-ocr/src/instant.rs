// SPDX-License-Identifier: MIT OR Apache-2.0
//! Instant path: per-object OCR executed immediately on upload.

use crate::airlock::{AirlockRejection, ExtractedTransaction, airlock_decode};
use crate::jst::jst_date;
use crate::vision::{EXTRACTION_PROMPT, VisionError, VisionModel};
use chrono::{DateTime, Days, Utc};
use std::sync::Arc;
use tracing::info;
use ytk_core::{
    Category, Currency, GUEST_DATA_TTL_DAYS, ImageId, Money, TraceId, Transaction, TransactionId,
    TransactionStatus, TransactionType, UserId,
};
use ytk_store::{Clock, META_TRACE_ID, ObjectStore, StoreError, TransactionRepo, move_object};
use ytk_telemetry::{EventName, TelemetryEvent};

/// Errors from the instant processor.
#[derive(Debug, thiserror::Error)]
pub enum InstantError {
    /// The object key does not look like an upload.
    #[error("unrecognised upload key: {0}")]
    BadKey(String),
    /// The object vanished between the event and the read.
    #[error("object missing: {0}")]
    MissingObject(String),
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Vendor failure.
    #[error(transparent)]
    Vision(#[from] VisionError),
}

/// Outcome of processing one uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantOutcome {
    /// The (stable) transaction id for this image.
    pub transaction_id: TransactionId,
    /// Status the row was written with.
    pub status: TransactionStatus,
    /// `true` when a row already existed and the write was a no-op.
    pub duplicate: bool,
}

/// Handles "object created under `uploads/`" events.
pub struct InstantProcessor {
    objects: Arc<dyn ObjectStore>,
    transactions: Arc<dyn TransactionRepo>,
    vision: Arc<dyn VisionModel>,
    clock: Arc<dyn Clock>,
}

impl InstantProcessor {
    /// Assemble the processor over its capabilities.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        transactions: Arc<dyn TransactionRepo>,
        vision: Arc<dyn VisionModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            objects,
            transactions,
            vision,
            clock,
        }
    }

    /// Process one freshly-created upload object.
    pub async fn handle_object_created(&self, key: &str) -> Result<InstantOutcome, InstantError> {
        let (user_id, image_id) = parse_upload_key(key)?;
        let transaction_id = TransactionId::for_image(&image_id);

        let Some(record) = self.objects.get(key).await? else {
            return Err(InstantError::MissingObject(key.to_string()));
        };
        // The object metadata bridges the client's trace across the
        // asynchronous event boundary.
        let trace = record
            .metadata
            .get(META_TRACE_ID)
            .and_then(|raw| TraceId::new(raw.clone()).ok())
            .unwrap_or_else(TraceId::random);

        let raw = self.vision.extract(&record.bytes, EXTRACTION_PROMPT).await?;
        let now = self.clock.now();
        let row = match airlock_decode(&raw) {
            Ok(extracted) => {
                build_row(transaction_id.clone(), &user_id, &image_id, extracted, now)
            }
            Err(rejection) => {
                needs_review_row(transaction_id.clone(), &user_id, &image_id, rejection, now)
            }
        };
        let status = row.status;

        let inserted = self.transactions.insert_if_absent(row).await?;
        if !inserted {
            // Idempotent duplicate: a retried event for an image we already
            // ingested. Log and continue; the object still gets moved.
            info!(
                transaction_id = %transaction_id,
                "transaction already exists; conditional put skipped"
            );
        } else {
            TelemetryEvent::new(EventName::ResultWritten, trace.clone())
                .user(user_id.clone())
                .field("transaction_id", transaction_id.as_str())
                .field("status", format!("{status:?}"))
                .emit();
        }

        let destination = format!("processed/{}/{}/{}", jst_date(now), user_id, image_id);
        move_object(self.objects.as_ref(), key, &destination).await?;

        Ok(InstantOutcome {
            transaction_id,
            status,
            duplicate: !inserted,
        })
    }
}

/// Split `uploads/{userId}/{unixMillis}-{fileName}` into its parts.
fn parse_upload_key(key: &str) -> Result<(UserId, ImageId), InstantError> {
    let bad = || InstantError::BadKey(key.to_string());
    let rest = key.strip_prefix("uploads/").ok_or_else(bad)?;
    let (user_raw, object_name) = rest.split_once('/').ok_or_else(bad)?;
    let user_id = UserId::new(user_raw).map_err(|_| bad())?;
    let image_id = ImageId::new(object_name).map_err(|_| bad())?;
    Ok((user_id, image_id))
}

fn guest_ttl(user: &UserId, now: DateTime<Utc>) -> Option<i64> {
    user.is_guest().then(|| {
        now.checked_add_days(Days::new(GUEST_DATA_TTL_DAYS as u64))
            .unwrap_or(now)
            .timestamp()
    })
}

/// A clean extraction becomes an `unconfirmed` row.
pub(crate) fn build_row(
    id: TransactionId,
    user: &UserId,
    image: &ImageId,
    extracted: ExtractedTransaction,
    now: DateTime<Utc>,
) -> Transaction {
    Transaction {
        id,
        user_id: user.clone(),
        image_id: Some(image.clone()),
        amount: extracted.money(),
        currency: Currency::Jpy,
        tx_type: extracted.tx_type,
        date: extracted.date,
        merchant: extracted.merchant,
        category: extracted.category,
        description: extracted.description,
        status: TransactionStatus::Unconfirmed,
        version: 1,
        dirty: false,
        created_at: now,
        updated_at: now,
        confirmed_at: None,
        ttl: guest_ttl(user, now),
        review_notes: Vec::new(),
    }
}

/// A rejected extraction still lands — as `needs_review`, with the
/// validation errors attached for downstream repair.
pub(crate) fn needs_review_row(
    id: TransactionId,
    user: &UserId,
    image: &ImageId,
    rejection: AirlockRejection,
    now: DateTime<Utc>,
) -> Transaction {
    Transaction {
        id,
        user_id: user.clone(),
        image_id: Some(image.clone()),
        amount: Money::ZERO,
        currency: Currency::Jpy,
        tx_type: TransactionType::Expense,
        date: jst_date(now),
        merchant: String::new(),
        category: Category::Other,
        description: String::new(),
        status: TransactionStatus::NeedsReview,
        version: 1,
        dirty: false,
        created_at: now,
        updated_at: now,
        confirmed_at: None,
        ttl: guest_ttl(user, now),
        review_notes: rejection.errors,
    }
}
