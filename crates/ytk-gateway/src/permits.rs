// SPDX-License-Identifier: MIT OR Apache-2.0
//! Permit issuance and quota reporting.

use crate::middleware::TraceContext;
use crate::presign::legacy_count;
use crate::{ApiError, AppState};
use axum::{Extension, Json, extract::State};
use chrono::{DateTime, Days, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use ytk_core::{GUEST_DATA_TTL_DAYS, Tier, UserId};
use ytk_ocr::jst_date;
use ytk_telemetry::{EventName, TelemetryEvent};

/// Request body for `POST /permit`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitBody {
    user_id: String,
    /// Kept as raw JSON so non-integers are rejected with a 400 instead of
    /// being silently coerced.
    #[serde(default)]
    valid_days: Option<serde_json::Value>,
    #[serde(default)]
    trace_id: Option<String>,
}

/// `POST /permit`.
pub async fn cmd_issue_permit(
    State(state): State<Arc<AppState>>,
    Extension(trace_ctx): Extension<TraceContext>,
    Json(body): Json<PermitBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let trace = trace_ctx.resolve(body.trace_id.as_deref());
    let user = UserId::new(body.user_id).map_err(|e| ApiError::invalid_param(e.to_string()))?;

    let valid_days = match body.valid_days {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => Some(value.as_i64().ok_or_else(|| {
            ApiError::invalid_param(format!("validDays must be an integer, got {value}"))
        })?),
    };

    let permit = state
        .issuer
        .issue(&user, valid_days, state.clock.now())
        .map_err(|e| ApiError::invalid_param(e.to_string()))?;

    TelemetryEvent::new(EventName::PermitIssued, trace)
        .user(user)
        .field("tier", permit.tier.as_str())
        .field("key_version", permit.key_version)
        .emit();

    Ok(Json(json!({ "permit": permit })))
}

/// Request body for `POST /quota`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaBody {
    user_id: String,
}

/// Guest-only block of the quota response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestBlock {
    data_expires_at: DateTime<Utc>,
    days_until_expiration: i64,
}

/// Response body for `POST /quota`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    used: u32,
    limit: u32,
    remaining: u32,
    resets_at: DateTime<Utc>,
    tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    guest: Option<GuestBlock>,
}

/// `POST /quota` — the server's view of the legacy daily window.
pub async fn cmd_quota(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QuotaBody>,
) -> Result<Json<QuotaResponse>, ApiError> {
    let user = UserId::new(body.user_id).map_err(|e| ApiError::invalid_param(e.to_string()))?;
    let tier = Tier::derive(&user);
    let now = state.clock.now();
    let today = jst_date(now);

    let used = legacy_count(state.counters.as_ref(), &user, today).await?;
    let limit = tier.legacy_daily_limit();

    let guest = if user.is_guest() {
        Some(guest_block(&state, &user, now).await?)
    } else {
        None
    };

    Ok(Json(QuotaResponse {
        used,
        limit,
        remaining: limit.saturating_sub(used),
        resets_at: next_jst_midnight(now),
        tier,
        guest,
    }))
}

async fn guest_block(
    state: &AppState,
    user: &UserId,
    now: DateTime<Utc>,
) -> Result<GuestBlock, ApiError> {
    // The guest's data horizon is the earliest row TTL, or a full window
    // when nothing is stored yet.
    let rows = state.transactions.list(user).await?;
    let earliest_ttl = rows.iter().filter_map(|row| row.ttl).min();
    let data_expires_at = earliest_ttl
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(|| {
            now.checked_add_days(Days::new(GUEST_DATA_TTL_DAYS as u64))
                .unwrap_or(now)
        });
    Ok(GuestBlock {
        data_expires_at,
        days_until_expiration: (data_expires_at - now).num_days().max(0),
    })
}

/// The next JST midnight, as a UTC instant.
fn next_jst_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let jst = FixedOffset::east_opt(9 * 3600).expect("JST offset is valid");
    let tomorrow = jst_date(now)
        .checked_add_days(Days::new(1))
        .expect("date arithmetic in range");
    tomorrow
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_local_timezone(jst)
        .single()
        .expect("JST has no DST gaps")
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jst_midnight_is_15_utc() {
        let now: DateTime<Utc> = "2026-01-15T03:00:00Z".parse().unwrap();
        // Next JST midnight after 12:00 JST is 2026-01-16T00:00+09:00.
        assert_eq!(
            next_jst_midnight(now),
            "2026-01-15T15:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }
}
