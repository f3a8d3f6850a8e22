// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP sync transport.

use crate::api::ApiClient;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use ytk_core::{SYNC_TIMEOUT_SECS, TraceId, Transaction, TransportError, UserId};
use ytk_sync::{PullPage, PushResponse, SyncTransport};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushBody<'a> {
    user_id: &'a UserId,
    transactions: &'a [Transaction],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullBody<'a> {
    user_id: &'a UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<u64>,
}

/// `POST /sync/push` and `POST /sync/pull`, each within the 10-second
/// sync deadline.
#[derive(Clone)]
pub struct HttpSyncTransport {
    api: ApiClient,
}

impl HttpSyncTransport {
    /// New transport over the shared API client.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn deadline() -> Duration {
        Duration::from_secs(SYNC_TIMEOUT_SECS)
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn push(
        &self,
        user: &UserId,
        batch: Vec<Transaction>,
        trace: &TraceId,
    ) -> Result<PushResponse, TransportError> {
        let body = PushBody {
            user_id: user,
            transactions: &batch,
        };
        self.api
            .post_json("/sync/push", &body, trace, Self::deadline())
            .await
    }

    async fn pull(
        &self,
        user: &UserId,
        since: Option<u64>,
        trace: &TraceId,
    ) -> Result<PullPage, TransportError> {
        let body = PullBody {
            user_id: user,
            since,
        };
        self.api
            .post_json("/sync/pull", &body, trace, Self::deadline())
            .await
    }
}
