// SPDX-License-Identifier: MIT OR Apache-2.0
//! Batch OCR endpoints.

use crate::middleware::TraceContext;
use crate::{ApiError, AppState};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use ytk_core::{ImageId, IntentId, JobId, UserId};
use ytk_ocr::{BatchSubmitError, BatchSubmitRequest};

/// Request body for `POST /batch/submit`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    intent_id: String,
    pending_image_ids: Vec<String>,
    model_id: String,
    user_id: String,
    #[serde(default)]
    trace_id: Option<String>,
}

/// `POST /batch/submit`.
pub async fn cmd_submit(
    State(state): State<Arc<AppState>>,
    Extension(trace_ctx): Extension<TraceContext>,
    Json(body): Json<SubmitBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let trace = trace_ctx.resolve(body.trace_id.as_deref());

    let intent_id =
        IntentId::new(body.intent_id).map_err(|e| ApiError::invalid_param(e.to_string()))?;
    let user_id =
        UserId::new(body.user_id).map_err(|e| ApiError::invalid_param(e.to_string()))?;
    let mut pending_image_ids = Vec::with_capacity(body.pending_image_ids.len());
    for raw in body.pending_image_ids {
        pending_image_ids
            .push(ImageId::new(raw).map_err(|e| ApiError::invalid_param(e.to_string()))?);
    }

    let request = BatchSubmitRequest {
        intent_id,
        pending_image_ids,
        model_id: body.model_id,
        user_id,
    };

    let outcome = state
        .orchestrator
        .submit(request, &trace)
        .await
        .map_err(|err| match err {
            BatchSubmitError::BelowThreshold { got, need } => {
                ApiError::invalid_param(format!("batch needs at least {need} images, got {got}"))
            }
            BatchSubmitError::RaceLost(intent) => ApiError::conflict_retryable(format!(
                "intent {intent} is being processed concurrently"
            )),
            BatchSubmitError::Store(err) => ApiError::internal(err.to_string()),
            BatchSubmitError::Vision(err) => ApiError::new(
                StatusCode::BAD_GATEWAY,
                "VENDOR_UNAVAILABLE",
                err.to_string(),
            ),
        })?;

    let status_url = outcome
        .job_id
        .as_ref()
        .map(|job| format!("/batch/jobs/{job}"));
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "jobId": outcome.job_id,
            "status": outcome.status,
            "statusUrl": status_url,
            "imageCount": outcome.image_count,
            "estimatedCost": outcome.estimated_cost,
            "estimatedDuration": outcome.estimated_duration_secs,
            "cached": outcome.cached,
        })),
    ))
}

/// `GET /batch/jobs/{job_id}`.
pub async fn cmd_job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = JobId::new(job_id.clone()).map_err(|e| ApiError::invalid_param(e.to_string()))?;

    // The status URL names the vendor job id, but an intent id works too
    // for clients polling before the vendor assigned one.
    let record = match state.jobs.get_by_job(&job).await? {
        Some(record) => Some(record),
        None => match IntentId::new(job_id.clone()) {
            Ok(intent) => state.jobs.get(&intent).await?,
            Err(_) => None,
        },
    };
    let Some(record) = record else {
        return Err(ApiError::not_found(format!("no batch job {job_id}")));
    };

    Ok(Json(json!({
        "jobId": record.job_id,
        "intentId": record.intent_id,
        "status": record.status,
        "imageCount": record.pending_image_count,
        "modelId": record.model_id,
        "submitTime": record.submit_time,
        "manifestUri": record.manifest_uri,
        "error": record.error,
    })))
}
