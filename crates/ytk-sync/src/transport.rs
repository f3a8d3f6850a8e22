// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire seam between the sync engine and the cloud.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ytk_core::{ErrorKind, TraceId, Transaction, TransactionId, TransportError, UserId};

/// One rejected row from a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRejection {
    /// The row that was refused.
    pub transaction_id: TransactionId,
    /// Why (usually [`ErrorKind::Conflict`]).
    pub kind: ErrorKind,
    /// The server's current row, attached on version conflicts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<Transaction>,
}

/// Server response to a push batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Rows the server accepted.
    pub accepted: Vec<TransactionId>,
    /// Rows the server refused, with detail.
    pub rejected: Vec<PushRejection>,
}

/// One page of a cursor-based pull.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullPage {
    /// Rows written after the requested cursor, in write order.
    pub transactions: Vec<Transaction>,
    /// Cursor to resume from.
    pub next_cursor: u64,
}

/// Sync wire capability. The HTTP implementation lives in `ytk-client`;
/// tests script their own.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Push a batch of dirty rows. One round-trip, 10-second deadline.
    async fn push(
        &self,
        user: &UserId,
        batch: Vec<Transaction>,
        trace: &TraceId,
    ) -> Result<PushResponse, TransportError>;

    /// Pull rows written after `since`.
    async fn pull(
        &self,
        user: &UserId,
        since: Option<u64>,
        trace: &TraceId,
    ) -> Result<PullPage, TransportError>;
}
