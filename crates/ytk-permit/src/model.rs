// SPDX-License-Identifier: MIT OR Apache-2.0
//! The permit wire format and its canonical signing message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ytk_core::{Tier, UserId};

/// Serde shim pinning timestamps to whole-second ISO-8601 `Z` form, so the
/// wire bytes always match the canonical signing message.
pub mod iso8601_seconds {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    /// Serialize as `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(FORMAT).to_string())
    }

    /// Deserialize from `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

/// Render a timestamp exactly as it appears in the canonical message.
pub fn canonical_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// A signed upload capability.
///
/// Immutable once issued: any field drift invalidates the signature. The
/// wire shape is fixed — exactly these fields, camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permit {
    /// User the capability is bound to.
    pub user_id: UserId,
    /// Lifetime upload cap.
    pub total_limit: u32,
    /// Daily upload cap; `0` means no daily cap.
    pub daily_rate: u32,
    /// Expiry instant.
    #[serde(with = "iso8601_seconds")]
    pub expires_at: DateTime<Utc>,
    /// Issuance instant.
    #[serde(with = "iso8601_seconds")]
    pub issued_at: DateTime<Utc>,
    /// Hex-lowercase HMAC-SHA256 over [`Permit::canonical_message`].
    pub signature: String,
    /// Tier the caps were derived from.
    pub tier: Tier,
    /// Version of the signing key; verification walks the ring in order.
    pub key_version: u32,
}

impl Permit {
    /// The exact byte sequence covered by the signature:
    /// `userId:totalLimit:dailyRate:expiresAt:issuedAt`.
    pub fn canonical_message(&self) -> String {
        canonical_message_parts(
            &self.user_id,
            self.total_limit,
            self.daily_rate,
            self.expires_at,
            self.issued_at,
        )
    }

    /// Whether the permit is expired at `now`. Expiry is inclusive: a
    /// permit is dead the instant `now >= expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Build the canonical message from loose parts (issuance signs before the
/// `Permit` value exists).
pub fn canonical_message_parts(
    user_id: &UserId,
    total_limit: u32,
    daily_rate: u32,
    expires_at: DateTime<Utc>,
    issued_at: DateTime<Utc>,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        user_id,
        total_limit,
        daily_rate,
        canonical_timestamp(expires_at),
        canonical_timestamp(issued_at),
    )
}
