// SPDX-License-Identifier: MIT OR Apache-2.0
//! Admin surfaces: the emergency stop and user data deletion.

use crate::{ApiError, AppState};
use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use ytk_core::UserId;

/// `GET /admin/control`.
pub async fn cmd_control_read(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.control.read().await?;
    Ok(Json(json!({
        "emergencyStop": record.emergency_stop,
        "reason": record.reason,
        "updatedAt": record.updated_at,
        "updatedBy": record.updated_by,
    })))
}

/// Request body for `POST /admin/control`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlBody {
    action: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    updated_by: Option<String>,
}

/// `POST /admin/control`.
pub async fn cmd_control_write(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ControlBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let active = match body.action.as_str() {
        "activate" => true,
        "deactivate" => false,
        other => {
            return Err(ApiError::invalid_param(format!(
                "action must be activate or deactivate, got {other:?}"
            )));
        }
    };
    let record = state
        .control
        .write(
            active,
            body.reason,
            body.updated_by.unwrap_or_else(|| "admin".into()),
            state.clock.now(),
        )
        .await?;
    Ok(Json(json!({
        "emergencyStop": record.emergency_stop,
        "reason": record.reason,
        "updatedAt": record.updated_at,
        "updatedBy": record.updated_by,
    })))
}

/// Request body for `POST /admin/delete-data`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBody {
    user_id: String,
    types: Vec<String>,
}

/// `POST /admin/delete-data` — wipe a user's rows and/or objects.
pub async fn cmd_delete_data(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = UserId::new(body.user_id).map_err(|e| ApiError::invalid_param(e.to_string()))?;

    let mut deleted = serde_json::Map::new();
    for kind in &body.types {
        match kind.as_str() {
            "transactions" => {
                let count = state.transactions.remove_user(&user).await?;
                deleted.insert("transactions".into(), json!(count));
            }
            "images" => {
                let count = delete_user_objects(&state, &user).await?;
                deleted.insert("images".into(), json!(count));
            }
            other => {
                return Err(ApiError::invalid_param(format!(
                    "unknown data type {other:?}"
                )));
            }
        }
    }
    Ok(Json(json!({ "deleted": deleted })))
}

async fn delete_user_objects(state: &AppState, user: &UserId) -> Result<u64, ApiError> {
    let mut count = 0u64;
    for key in state.objects.list(&format!("uploads/{user}/")).await? {
        if state.objects.delete(&key).await? {
            count += 1;
        }
    }
    // Processed objects live under dated partitions; match on the user
    // segment.
    let marker = format!("/{user}/");
    for key in state.objects.list("processed/").await? {
        if key.contains(&marker) && state.objects.delete(&key).await? {
            count += 1;
        }
    }
    Ok(count)
}
