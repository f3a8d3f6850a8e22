// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subscription tiers and their upload caps.

use crate::id::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription tier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Locally-generated identity; data carries a TTL.
    Guest,
    /// Signed-in, no subscription.
    Free,
    /// Paid entry tier.
    Basic,
    /// Paid top tier. No daily upload cap.
    Pro,
}

impl Tier {
    /// Derive the tier from the user identifier alone.
    ///
    /// `device-*` / `ephemeral-*` identities are guests; anything else is
    /// treated as `free` unless the identity provider says otherwise.
    pub fn derive(user: &UserId) -> Self {
        if user.is_guest() { Self::Guest } else { Self::Free }
    }

    /// Lifetime total-upload cap written into issued permits.
    pub fn permit_total_limit(&self) -> u32 {
        match self {
            Self::Guest => 50,
            Self::Free => 200,
            Self::Basic => 1_000,
            Self::Pro => 10_000,
        }
    }

    /// Daily-upload rate written into issued permits. `0` means no daily cap.
    pub fn permit_daily_rate(&self) -> u32 {
        match self {
            Self::Guest => 5,
            Self::Free => 20,
            Self::Basic => 50,
            Self::Pro => 0,
        }
    }

    /// Daily limit applied by the legacy server-side counter when a request
    /// carries no permit.
    pub fn legacy_daily_limit(&self) -> u32 {
        match self {
            Self::Guest => 30,
            Self::Free => 50,
            Self::Basic => 100,
            Self::Pro => 300,
        }
    }

    /// Stable string representation (`"guest"`, `"free"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Pro => "pro",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
