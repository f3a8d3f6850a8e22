// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable client-side quota ledger.
//!
//! Holds the one stored permit and its usage counters in the device KV
//! store. All writers go through the same handle; the check itself is the
//! pure function in [`crate::quota`].

use crate::model::Permit;
use crate::quota::{QuotaDecision, StoredPermit, check_can_upload};
use async_trait::async_trait;
use chrono::{FixedOffset, Local, NaiveDate, Offset};
use std::sync::Arc;
use ytk_store::{Clock, KvStore, StoreError, get_json, put_json};

/// KV key of the stored permit document.
const PERMIT_KEY: &str = "permit/current";

/// Errors from the quota ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Underlying KV failure.
    #[error("quota ledger storage: {0}")]
    Store(#[from] StoreError),
}

/// Quota capability consumed by the upload queue.
#[async_trait]
pub trait QuotaCheck: Send + Sync {
    /// Decide whether an upload may be enqueued right now.
    async fn check(&self) -> Result<QuotaDecision, LedgerError>;

    /// Record one successful upload.
    async fn record_upload(&self) -> Result<(), LedgerError>;

    /// The stored permit, for attaching to presign requests.
    async fn current_permit(&self) -> Result<Option<Permit>, LedgerError>;
}

/// KV-backed [`QuotaCheck`].
pub struct KvPermitLedger {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    local_offset: FixedOffset,
}

impl KvPermitLedger {
    /// New ledger using the device's local timezone for "today".
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let local_offset = Local::now().offset().fix();
        Self::with_offset(kv, clock, local_offset)
    }

    /// New ledger with an explicit local offset (tests, fixed deployments).
    pub fn with_offset(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        local_offset: FixedOffset,
    ) -> Self {
        Self {
            kv,
            clock,
            local_offset,
        }
    }

    fn today(&self) -> NaiveDate {
        self.clock
            .now()
            .with_timezone(&self.local_offset)
            .date_naive()
    }

    /// Load the stored permit document.
    pub async fn load(&self) -> Result<Option<StoredPermit>, LedgerError> {
        Ok(get_json(self.kv.as_ref(), PERMIT_KEY).await?)
    }

    /// Install a newly-issued permit.
    ///
    /// Counters carry over only when the incoming permit is byte-identical
    /// to the stored one; a genuinely new permit starts from zero.
    pub async fn install(&self, permit: Permit) -> Result<(), LedgerError> {
        let stored = match self.load().await? {
            Some(existing) if existing.permit == permit => existing,
            _ => StoredPermit::new(permit),
        };
        put_json(self.kv.as_ref(), PERMIT_KEY, &stored).await?;
        Ok(())
    }

    /// Drop the stored permit entirely.
    pub async fn clear(&self) -> Result<(), LedgerError> {
        self.kv.remove(PERMIT_KEY).await?;
        Ok(())
    }
}

#[async_trait]
impl QuotaCheck for KvPermitLedger {
    async fn check(&self) -> Result<QuotaDecision, LedgerError> {
        let stored = self.load().await?;
        Ok(check_can_upload(
            stored.as_ref(),
            self.clock.now(),
            self.today(),
        ))
    }

    async fn record_upload(&self) -> Result<(), LedgerError> {
        if let Some(mut stored) = self.load().await? {
            stored.increment_usage(self.today());
            put_json(self.kv.as_ref(), PERMIT_KEY, &stored).await?;
        }
        Ok(())
    }

    async fn current_permit(&self) -> Result<Option<Permit>, LedgerError> {
        Ok(self.load().await?.map(|s| s.permit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::PermitIssuer;
    use crate::keyring::KeyRing;
    use crate::quota::DenyReason;
    use chrono::{Duration, Utc};
    use ytk_core::UserId;
    use ytk_store::{FixedClock, MemoryKvStore};

    fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn ledger_at(clock: FixedClock) -> KvPermitLedger {
        KvPermitLedger::with_offset(
            Arc::new(MemoryKvStore::new()),
            Arc::new(clock),
            jst(),
        )
    }

    fn issue_permit(now: chrono::DateTime<Utc>) -> Permit {
        PermitIssuer::new(KeyRing::single(1, "test-secret-v1"))
            .issue(&UserId::new("device-abc").unwrap(), None, now)
            .unwrap()
    }

    #[tokio::test]
    async fn empty_ledger_denies_with_no_permit() {
        let clock = FixedClock::at("2026-01-15T03:00:00Z".parse().unwrap());
        let ledger = ledger_at(clock);
        let decision = ledger.check().await.unwrap();
        assert_eq!(decision.reason, Some(DenyReason::NoPermit));
    }

    #[tokio::test]
    async fn install_check_record_cycle() {
        let now = "2026-01-15T03:00:00Z".parse().unwrap();
        let clock = FixedClock::at(now);
        let ledger = ledger_at(clock.clone());
        ledger.install(issue_permit(now)).await.unwrap();

        assert!(ledger.check().await.unwrap().allowed);
        for _ in 0..5 {
            ledger.record_upload().await.unwrap();
        }
        let decision = ledger.check().await.unwrap();
        assert_eq!(decision.reason, Some(DenyReason::DailyLimitReached));

        // The daily bucket rolls over at local midnight.
        clock.advance(Duration::hours(24));
        assert!(ledger.check().await.unwrap().allowed);
        let stored = ledger.load().await.unwrap().unwrap();
        assert_eq!(stored.total_used, 5);
    }

    #[tokio::test]
    async fn reinstalling_same_permit_keeps_counters() {
        let now = "2026-01-15T03:00:00Z".parse().unwrap();
        let ledger = ledger_at(FixedClock::at(now));
        let permit = issue_permit(now);
        ledger.install(permit.clone()).await.unwrap();
        ledger.record_upload().await.unwrap();
        ledger.install(permit).await.unwrap();
        assert_eq!(ledger.load().await.unwrap().unwrap().total_used, 1);
    }

    #[tokio::test]
    async fn installing_new_permit_resets_counters() {
        let now: chrono::DateTime<Utc> = "2026-01-15T03:00:00Z".parse().unwrap();
        let ledger = ledger_at(FixedClock::at(now));
        ledger.install(issue_permit(now)).await.unwrap();
        ledger.record_upload().await.unwrap();
        // Issued a second later: different issuedAt, different signature.
        ledger
            .install(issue_permit(now + Duration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(ledger.load().await.unwrap().unwrap().total_used, 0);
    }

    #[tokio::test]
    async fn local_date_uses_the_configured_offset() {
        // 16:00 UTC on the 14th is already the 15th in JST.
        let now = "2026-01-14T16:00:00Z".parse().unwrap();
        let ledger = ledger_at(FixedClock::at(now));
        ledger.install(issue_permit(now)).await.unwrap();
        ledger.record_upload().await.unwrap();
        let stored = ledger.load().await.unwrap().unwrap();
        assert_eq!(
            stored.daily_usage.keys().next().unwrap().to_string(),
            "2026-01-15"
        );
    }
}
