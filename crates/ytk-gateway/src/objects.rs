// SPDX-License-Identifier: MIT OR Apache-2.0
//! Self-hosted object endpoint.
//!
//! Serves the PUT/GET targets of the HMAC-token URLs issued by the presign
//! gate. Tokens are verified against the key ring, bounded by their
//! embedded expiry, and single-use. A successful upload PUT hands the new
//! object straight to the instant processor.

use crate::middleware::TraceContext;
use crate::presign::grant_message;
use crate::{ApiError, AppState};
use axum::Extension;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;
use ytk_core::TraceId;
use ytk_store::{META_TRACE_ID, META_USER_ID};

/// Grant token carried in the URL query.
#[derive(Debug, Deserialize)]
pub struct GrantQuery {
    expires: i64,
    signature: String,
}

fn verify_grant(
    state: &AppState,
    method: &str,
    key: &str,
    grant: &GrantQuery,
) -> Result<(), ApiError> {
    if state.clock.now().timestamp() >= grant.expires {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "GRANT_EXPIRED",
            "presigned URL has expired",
        ));
    }
    state
        .ring
        .verify(&grant_message(method, key, grant.expires), &grant.signature)
        .map(|_| ())
        .map_err(|_| ApiError::invalid_signature())
}

async fn consume_grant(state: &AppState, signature: &str) -> Result<(), ApiError> {
    let mut used = state.used_grants.lock().await;
    if !used.insert(signature.to_string()) {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "GRANT_USED",
            "presigned URL was already used",
        ));
    }
    Ok(())
}

/// `PUT /objects/{key}` — accept a presigned upload.
pub async fn cmd_put_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(grant): Query<GrantQuery>,
    Extension(trace_ctx): Extension<TraceContext>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    verify_grant(&state, "PUT", &key, &grant)?;
    consume_grant(&state, &grant.signature).await?;

    let trace: TraceId = trace_ctx.trace.clone();

    // The key owns its user segment: uploads/{userId}/...
    let mut metadata = BTreeMap::new();
    metadata.insert(META_TRACE_ID.to_string(), trace.to_string());
    if let Some(user) = key
        .strip_prefix("uploads/")
        .and_then(|rest| rest.split('/').next())
    {
        metadata.insert(META_USER_ID.to_string(), user.to_string());
    }

    state.objects.put(&key, body.to_vec(), metadata).await?;

    // Object-created event, delivered in-process in self-hosted mode. OCR
    // failures must not fail the upload; the object simply stays put for a
    // later batch pass.
    if key.starts_with("uploads/") {
        if let Err(err) = state.instant.handle_object_created(&key).await {
            warn!(key = %key, error = %err, "instant processing failed");
        }
    }

    Ok(StatusCode::OK)
}

/// `GET /objects/{key}` — serve a presigned download.
pub async fn cmd_get_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(grant): Query<GrantQuery>,
) -> Result<Response, ApiError> {
    verify_grant(&state, "GET", &key, &grant)?;
    consume_grant(&state, &grant.signature).await?;

    let Some(record) = state.objects.get(&key).await? else {
        return Err(ApiError::not_found(format!("no object at {key}")));
    };
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        record.bytes,
    )
        .into_response())
}
