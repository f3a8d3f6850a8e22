// SPDX-License-Identifier: MIT OR Apache-2.0
//! Permit issuance.

use crate::keyring::KeyRing;
use crate::model::{Permit, canonical_message_parts};
use chrono::{DateTime, Duration, Timelike, Utc};
use ytk_core::{Tier, UserId};

/// Default permit validity when the request does not name one.
pub const DEFAULT_VALID_DAYS: i64 = 30;

/// Errors rejecting an issuance request. All map to a 400 at the surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssueError {
    /// `validDays` must be a positive integer.
    #[error("validDays must be a positive integer, got {0}")]
    InvalidValidDays(i64),
}

/// Issues signed permits under the current key.
pub struct PermitIssuer {
    ring: KeyRing,
}

impl PermitIssuer {
    /// New issuer over a key ring.
    pub fn new(ring: KeyRing) -> Self {
        Self { ring }
    }

    /// The underlying ring, for verification at the gate.
    pub fn ring(&self) -> &KeyRing {
        &self.ring
    }

    /// Issue a permit for `user`.
    ///
    /// The tier is derived from the user-id prefix; callers with an
    /// identity-provider-confirmed tier use [`PermitIssuer::issue_for_tier`].
    pub fn issue(
        &self,
        user: &UserId,
        valid_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Permit, IssueError> {
        self.issue_for_tier(user, Tier::derive(user), valid_days, now)
    }

    /// Issue a permit for `user` at an explicit tier.
    pub fn issue_for_tier(
        &self,
        user: &UserId,
        tier: Tier,
        valid_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Permit, IssueError> {
        let valid_days = valid_days.unwrap_or(DEFAULT_VALID_DAYS);
        if valid_days <= 0 {
            return Err(IssueError::InvalidValidDays(valid_days));
        }

        // The signature covers whole-second timestamps; truncate up front so
        // the stored instant and the signed bytes agree.
        let issued_at = now.with_nanosecond(0).unwrap_or(now);
        let expires_at = issued_at + Duration::days(valid_days);

        let total_limit = tier.permit_total_limit();
        let daily_rate = tier.permit_daily_rate();
        let message =
            canonical_message_parts(user, total_limit, daily_rate, expires_at, issued_at);

        Ok(Permit {
            user_id: user.clone(),
            total_limit,
            daily_rate,
            expires_at,
            issued_at,
            signature: self.ring.sign(&message),
            tier,
            key_version: self.ring.current().version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> PermitIssuer {
        PermitIssuer::new(KeyRing::single(1, "test-secret-v1"))
    }

    fn user() -> UserId {
        UserId::new("device-abc").unwrap()
    }

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00.734Z".parse().unwrap()
    }

    #[test]
    fn issued_permit_verifies() {
        let issuer = issuer();
        let permit = issuer.issue(&user(), None, now()).unwrap();
        assert_eq!(issuer.ring().verify_permit(&permit), Ok(1));
        assert_eq!(permit.tier, Tier::Guest);
        assert_eq!(permit.total_limit, 50);
        assert_eq!(permit.daily_rate, 5);
        assert_eq!(permit.key_version, 1);
    }

    #[test]
    fn default_validity_is_thirty_days() {
        let permit = issuer().issue(&user(), None, now()).unwrap();
        assert_eq!(permit.expires_at - permit.issued_at, Duration::days(30));
    }

    #[test]
    fn explicit_validity_is_honoured() {
        let permit = issuer().issue(&user(), Some(7), now()).unwrap();
        assert_eq!(permit.expires_at - permit.issued_at, Duration::days(7));
    }

    #[test]
    fn zero_and_negative_valid_days_rejected() {
        assert_eq!(
            issuer().issue(&user(), Some(0), now()),
            Err(IssueError::InvalidValidDays(0))
        );
        assert_eq!(
            issuer().issue(&user(), Some(-3), now()),
            Err(IssueError::InvalidValidDays(-3))
        );
    }

    #[test]
    fn timestamps_are_whole_seconds() {
        let permit = issuer().issue(&user(), None, now()).unwrap();
        assert_eq!(permit.issued_at.timestamp_subsec_nanos(), 0);
        // Re-signing the canonical message reproduces the stored signature.
        let resigned = issuer().ring().sign(&permit.canonical_message());
        assert_eq!(resigned, permit.signature);
    }

    #[test]
    fn tampered_total_limit_fails_verification() {
        let issuer = issuer();
        let mut permit = issuer.issue(&user(), None, now()).unwrap();
        permit.total_limit = 500;
        assert!(issuer.ring().verify_permit(&permit).is_err());
    }

    #[test]
    fn non_guest_users_default_to_free_caps() {
        let permit = issuer()
            .issue(&UserId::new("u-777").unwrap(), None, now())
            .unwrap();
        assert_eq!(permit.tier, Tier::Free);
        assert_eq!(permit.total_limit, 200);
        assert_eq!(permit.daily_rate, 20);
    }

    #[test]
    fn pro_tier_issues_unlimited_daily() {
        let permit = issuer()
            .issue_for_tier(&UserId::new("u-777").unwrap(), Tier::Pro, None, now())
            .unwrap();
        assert_eq!(permit.daily_rate, 0);
    }
}
