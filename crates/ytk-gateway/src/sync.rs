// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transaction sync endpoints.
//!
//! The server is the version arbiter: a write is accepted only when it
//! continues directly from the stored version (`incoming == stored + 1`,
//! with absent rows at version 0). Anything else comes back as a rejection
//! carrying the server's current row so the client can rebase.

use crate::{ApiError, AppState};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ytk_core::{ErrorKind, Transaction, TransactionId, UserId};
use ytk_store::VersionedPut;

/// Request body for `POST /sync/push`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushBody {
    user_id: String,
    transactions: Vec<Transaction>,
}

/// One rejected row.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    transaction_id: TransactionId,
    kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    current: Option<Transaction>,
}

/// Response body for `POST /sync/push`.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReply {
    accepted: Vec<TransactionId>,
    rejected: Vec<Rejection>,
}

/// `POST /sync/push`.
pub async fn cmd_push(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PushBody>,
) -> Result<Json<PushReply>, ApiError> {
    let user = UserId::new(body.user_id).map_err(|e| ApiError::invalid_param(e.to_string()))?;
    let mut reply = PushReply::default();

    for row in body.transactions {
        if row.user_id != user {
            reply.rejected.push(Rejection {
                transaction_id: row.id,
                kind: ErrorKind::Validation,
                current: None,
            });
            continue;
        }

        let expected = row.version.saturating_sub(1);
        match state.transactions.put_versioned(row.clone(), expected).await? {
            VersionedPut::Applied => reply.accepted.push(row.id),
            VersionedPut::Conflict(current) => {
                // A re-push of an already-applied version is a no-op, not a
                // conflict.
                let kind = if current.version == row.version {
                    ErrorKind::IdempotentDuplicate
                } else {
                    ErrorKind::Conflict
                };
                reply.rejected.push(Rejection {
                    transaction_id: row.id,
                    kind,
                    current: Some(current),
                });
            }
        }
    }

    Ok(Json(reply))
}

/// Request body for `POST /sync/pull`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullBody {
    user_id: String,
    #[serde(default)]
    since: Option<u64>,
}

/// Response body for `POST /sync/pull`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReply {
    transactions: Vec<Transaction>,
    next_cursor: u64,
}

/// `POST /sync/pull`.
pub async fn cmd_pull(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PullBody>,
) -> Result<Json<PullReply>, ApiError> {
    let user = UserId::new(body.user_id).map_err(|e| ApiError::invalid_param(e.to_string()))?;
    let (transactions, next_cursor) =
        state.transactions.changed_since(&user, body.since).await?;
    Ok(Json(PullReply {
        transactions,
        next_cursor,
    }))
}
