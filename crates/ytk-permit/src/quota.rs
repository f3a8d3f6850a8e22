// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client-side quota accounting.
//!
//! [`check_can_upload`] is a pure function of the stored permit, its usage
//! counters, and the clock — the decision priority is strict and the first
//! failing rule wins. "Today" is the device-local calendar date, passed in
//! by the caller; the server keeps its own (JST-keyed) books.

use crate::model::Permit;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ytk_core::DAILY_USAGE_RETENTION_DAYS;

/// Why an upload is not allowed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No permit is stored on this device.
    NoPermit,
    /// The stored permit is past its expiry.
    PermitExpired,
    /// The lifetime cap is used up.
    TotalLimitReached,
    /// Today's cap is used up.
    DailyLimitReached,
}

/// Outcome of a client-side quota check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    /// Whether an upload may be enqueued.
    pub allowed: bool,
    /// First failing rule, when not allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    /// Uploads left on the lifetime cap.
    pub remaining_total: u32,
    /// Uploads left today; `None` when the tier has no daily cap.
    pub remaining_daily: Option<u32>,
}

impl QuotaDecision {
    fn denied(reason: DenyReason, remaining_total: u32, remaining_daily: Option<u32>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            remaining_total,
            remaining_daily,
        }
    }
}

/// A permit at rest on the device, with observed usage beside it.
///
/// The counters are bookkeeping, not capability: they are not covered by
/// the signature and the gate re-checks everything server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPermit {
    /// The signed capability.
    pub permit: Permit,
    /// Total uploads observed through this permit.
    #[serde(default)]
    pub total_used: u32,
    /// Per-day upload counts, device-local dates. Trailing window only.
    #[serde(default)]
    pub daily_usage: BTreeMap<NaiveDate, u32>,
}

impl StoredPermit {
    /// Wrap a freshly-issued permit with zeroed counters.
    pub fn new(permit: Permit) -> Self {
        Self {
            permit,
            total_used: 0,
            daily_usage: BTreeMap::new(),
        }
    }

    /// Uploads recorded for the given date.
    pub fn used_on(&self, date: NaiveDate) -> u32 {
        self.daily_usage.get(&date).copied().unwrap_or(0)
    }

    /// Record one successful upload: bumps the lifetime counter and today's
    /// bucket, then prunes buckets older than the retention window.
    pub fn increment_usage(&mut self, today: NaiveDate) {
        self.total_used = self.total_used.saturating_add(1);
        *self.daily_usage.entry(today).or_insert(0) += 1;
        self.prune(today);
    }

    fn prune(&mut self, today: NaiveDate) {
        if let Some(cutoff) = today.checked_sub_days(Days::new(DAILY_USAGE_RETENTION_DAYS as u64))
        {
            self.daily_usage.retain(|date, _| *date >= cutoff);
        }
    }
}

/// Decide whether an upload may be enqueued.
///
/// Rule order is strict: missing permit, then expiry, then the lifetime
/// cap, then the daily cap. A `daily_rate` of `0` means "no daily cap" and
/// short-circuits the daily rule.
pub fn check_can_upload(
    stored: Option<&StoredPermit>,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> QuotaDecision {
    let Some(stored) = stored else {
        return QuotaDecision::denied(DenyReason::NoPermit, 0, Some(0));
    };
    let permit = &stored.permit;

    let remaining_total = permit.total_limit.saturating_sub(stored.total_used);
    let remaining_daily = if permit.daily_rate == 0 {
        None
    } else {
        Some(permit.daily_rate.saturating_sub(stored.used_on(today)))
    };

    if permit.is_expired(now) {
        return QuotaDecision::denied(DenyReason::PermitExpired, remaining_total, remaining_daily);
    }
    if stored.total_used >= permit.total_limit {
        return QuotaDecision::denied(
            DenyReason::TotalLimitReached,
            remaining_total,
            remaining_daily,
        );
    }
    if permit.daily_rate > 0 && stored.used_on(today) >= permit.daily_rate {
        return QuotaDecision::denied(
            DenyReason::DailyLimitReached,
            remaining_total,
            remaining_daily,
        );
    }

    QuotaDecision {
        allowed: true,
        reason: None,
        remaining_total,
        remaining_daily,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ytk_core::{Tier, UserId};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn permit(total: u32, daily: u32) -> Permit {
        Permit {
            user_id: UserId::new("device-abc").unwrap(),
            total_limit: total,
            daily_rate: daily,
            expires_at: ts("2026-02-01T00:00:00Z"),
            issued_at: ts("2026-01-01T00:00:00Z"),
            signature: "irrelevant-here".into(),
            tier: Tier::Guest,
            key_version: 1,
        }
    }

    const NOW: &str = "2026-01-15T12:00:00Z";
    const TODAY: &str = "2026-01-15";

    #[test]
    fn no_permit_wins_first() {
        let decision = check_can_upload(None, ts(NOW), day(TODAY));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenyReason::NoPermit));
    }

    #[test]
    fn expiry_beats_limits() {
        let mut stored = StoredPermit::new(permit(50, 5));
        stored.total_used = 50; // Also over the total cap.
        let decision = check_can_upload(Some(&stored), ts("2026-02-01T00:00:00Z"), day("2026-02-01"));
        assert_eq!(decision.reason, Some(DenyReason::PermitExpired));
    }

    #[test]
    fn total_limit_boundary() {
        let mut stored = StoredPermit::new(permit(50, 0));
        stored.total_used = 49;
        let decision = check_can_upload(Some(&stored), ts(NOW), day(TODAY));
        assert!(decision.allowed);
        assert_eq!(decision.remaining_total, 1);

        stored.total_used = 50;
        let decision = check_can_upload(Some(&stored), ts(NOW), day(TODAY));
        assert_eq!(decision.reason, Some(DenyReason::TotalLimitReached));
        assert_eq!(decision.remaining_total, 0);
    }

    #[test]
    fn daily_limit_boundary() {
        let mut stored = StoredPermit::new(permit(50, 5));
        stored.daily_usage.insert(day(TODAY), 4);
        let decision = check_can_upload(Some(&stored), ts(NOW), day(TODAY));
        assert!(decision.allowed);
        assert_eq!(decision.remaining_daily, Some(1));

        stored.daily_usage.insert(day(TODAY), 5);
        let decision = check_can_upload(Some(&stored), ts(NOW), day(TODAY));
        assert_eq!(decision.reason, Some(DenyReason::DailyLimitReached));
        assert_eq!(decision.remaining_daily, Some(0));
    }

    #[test]
    fn zero_daily_rate_means_unlimited() {
        let mut stored = StoredPermit::new(permit(10_000, 0));
        stored.daily_usage.insert(day(TODAY), 900);
        let decision = check_can_upload(Some(&stored), ts(NOW), day(TODAY));
        assert!(decision.allowed);
        assert_eq!(decision.remaining_daily, None);
    }

    #[test]
    fn yesterdays_usage_does_not_count_today() {
        let mut stored = StoredPermit::new(permit(50, 5));
        stored.daily_usage.insert(day("2026-01-14"), 5);
        let decision = check_can_upload(Some(&stored), ts(NOW), day(TODAY));
        assert!(decision.allowed);
        assert_eq!(decision.remaining_daily, Some(5));
    }

    #[test]
    fn increment_bumps_both_counters() {
        let mut stored = StoredPermit::new(permit(50, 5));
        stored.increment_usage(day(TODAY));
        stored.increment_usage(day(TODAY));
        assert_eq!(stored.total_used, 2);
        assert_eq!(stored.used_on(day(TODAY)), 2);
    }

    #[test]
    fn increment_prunes_stale_buckets() {
        let mut stored = StoredPermit::new(permit(50, 5));
        stored.daily_usage.insert(day("2026-01-07"), 3); // 8 days old: pruned
        stored.daily_usage.insert(day("2026-01-08"), 2); // exactly 7 days old: kept
        stored.increment_usage(day(TODAY));
        assert!(!stored.daily_usage.contains_key(&day("2026-01-07")));
        assert!(stored.daily_usage.contains_key(&day("2026-01-08")));
        assert_eq!(stored.used_on(day(TODAY)), 1);
    }

    #[test]
    fn decision_is_pure() {
        let stored = StoredPermit::new(permit(50, 5));
        let a = check_can_upload(Some(&stored), ts(NOW), day(TODAY));
        let b = check_can_upload(Some(&stored), ts(NOW), day(TODAY));
        assert_eq!(a, b);
    }
}
