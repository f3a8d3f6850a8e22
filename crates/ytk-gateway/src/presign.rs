// SPDX-License-Identifier: MIT OR Apache-2.0
//! The presign + quota gate.
//!
//! Permit-mode requests are validated cryptographically and pass without
//! touching the legacy counters; permitless requests fall back to a
//! server-tracked per-day counter keyed by the JST date. Either way the
//! grant is an HMAC-token URL with a bounded lifetime, single-use at the
//! object endpoint.

use crate::middleware::TraceContext;
use crate::{ApiError, AppState};
use axum::{Extension, Json, extract::State};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use ytk_core::{PRESIGN_URL_TTL_SECS, Tier, TraceId, UserId};
use ytk_ocr::jst_date;
use ytk_permit::{KeyRing, Permit};
use ytk_store::{KvStore, get_json, put_json};
use ytk_telemetry::{EventLevel, EventName, TelemetryEvent};

/// Request body for `POST /presign`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignBody {
    user_id: String,
    file_name: String,
    #[allow(dead_code)]
    content_type: String,
    #[serde(default)]
    permit: Option<Permit>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    s3_key: Option<String>,
    #[serde(default)]
    trace_id: Option<String>,
}

/// Response body for `POST /presign`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    url: String,
    key: String,
    trace_id: TraceId,
}

/// `POST /presign`.
pub async fn cmd_presign(
    State(state): State<Arc<AppState>>,
    Extension(trace_ctx): Extension<TraceContext>,
    Json(body): Json<PresignBody>,
) -> Result<Json<PresignResponse>, ApiError> {
    let trace = trace_ctx.resolve(body.trace_id.as_deref());

    if state.control.is_stopped().await? {
        return Err(ApiError::service_unavailable());
    }

    let user = UserId::new(body.user_id.clone())
        .map_err(|e| ApiError::invalid_param(e.to_string()))?;
    let now = state.clock.now();

    // Download grants only need a valid key; quota applies to uploads.
    if body.action.as_deref() == Some("download") {
        let key = body
            .s3_key
            .ok_or_else(|| ApiError::invalid_param("s3Key required for download"))?;
        let (url, _) = sign_object_url(&state, "GET", &key, now);
        return Ok(Json(PresignResponse { url, key, trace_id: trace }));
    }

    if let Some(permit) = &body.permit {
        validate_permit(&state.ring, permit, &user, now).inspect_err(|err| {
            TelemetryEvent::new(EventName::PermitRejected, trace.clone())
                .level(EventLevel::Warn)
                .user(user.clone())
                .field("code", err.code.clone())
                .emit();
        })?;
    } else {
        enforce_legacy_quota(&state, &user, now, &trace).await?;
    }

    let file_name = sanitize_file_name(&body.file_name);
    // Clients upload under their image id, which already carries the
    // capture millis; anything else gets stamped here.
    let object_name = if ytk_core::ImageId::new(file_name.clone()).is_ok() {
        file_name
    } else {
        format!("{}-{}", now.timestamp_millis(), file_name)
    };
    let key = format!("uploads/{user}/{object_name}");
    let (url, expires) = sign_object_url(&state, "PUT", &key, now);

    info!(user_id = %user, key = %key, expires, "upload grant issued");
    Ok(Json(PresignResponse { url, key, trace_id: trace }))
}

/// Validate an attached permit: field sanity, expiry, then signature.
fn validate_permit(
    ring: &KeyRing,
    permit: &Permit,
    user: &UserId,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    if &permit.user_id != user {
        return Err(ApiError::invalid_signature());
    }
    if permit.signature.is_empty() {
        return Err(ApiError::invalid_signature());
    }
    if permit.is_expired(now) {
        return Err(ApiError::permit_expired());
    }
    ring.verify_permit(permit)
        .map(|_| ())
        .map_err(|_| ApiError::invalid_signature())
}

// ---------------------------------------------------------------------------
// Legacy fallback counter
// ---------------------------------------------------------------------------

fn counter_key(user: &UserId, date: NaiveDate) -> String {
    format!("quota/{user}/{date}")
}

/// Read today's count for a permitless user.
pub async fn legacy_count(
    counters: &dyn KvStore,
    user: &UserId,
    date: NaiveDate,
) -> Result<u32, ApiError> {
    Ok(get_json(counters, &counter_key(user, date)).await?.unwrap_or(0))
}

async fn enforce_legacy_quota(
    state: &AppState,
    user: &UserId,
    now: DateTime<Utc>,
    trace: &TraceId,
) -> Result<(), ApiError> {
    let tier = Tier::derive(user);
    let date = jst_date(now);
    let used = legacy_count(state.counters.as_ref(), user, date).await?;
    if used >= tier.legacy_daily_limit() {
        TelemetryEvent::new(EventName::QuotaExceeded, trace.clone())
            .level(EventLevel::Warn)
            .user(user.clone())
            .field("used", used)
            .field("limit", tier.legacy_daily_limit())
            .emit();
        return Err(ApiError::quota_exceeded(format!(
            "daily limit of {} reached",
            tier.legacy_daily_limit()
        )));
    }
    put_json(
        state.counters.as_ref(),
        &counter_key(user, date),
        &(used + 1),
    )
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Grant signing
// ---------------------------------------------------------------------------

/// The exact bytes covered by a grant token.
pub fn grant_message(method: &str, key: &str, expires: i64) -> String {
    format!("{method}\n{key}\n{expires}")
}

fn sign_object_url(state: &AppState, method: &str, key: &str, now: DateTime<Utc>) -> (String, i64) {
    let expires = now.timestamp() + PRESIGN_URL_TTL_SECS as i64;
    let signature = state.ring.sign(&grant_message(method, key, expires));
    let url = format!(
        "{}/objects/{key}?expires={expires}&signature={signature}",
        state.config.object_base_url
    );
    (url, expires)
}

fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let clean: String = base
        .chars()
        .map(|c| if c.is_whitespace() || c == '?' || c == '&' { '_' } else { c })
        .collect();
    if clean.is_empty() { "upload".into() } else { clean }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_lose_paths_and_query_hostile_chars() {
        assert_eq!(sanitize_file_name("receipt.jpg"), "receipt.jpg");
        assert_eq!(sanitize_file_name("a/b/receipt.jpg"), "receipt.jpg");
        assert_eq!(sanitize_file_name("my receipt?.jpg"), "my_receipt_.jpg");
        assert_eq!(sanitize_file_name(""), "upload");
    }

    #[test]
    fn grant_message_is_newline_delimited() {
        assert_eq!(
            grant_message("PUT", "uploads/u/1-a.webp", 123),
            "PUT\nuploads/u/1-a.webp\n123"
        );
    }
}
