// SPDX-License-Identifier: MIT OR Apache-2.0
//! Quota and permit endpoints.

use crate::api::ApiClient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ytk_core::{Tier, TraceId, TransportError, UserId};
use ytk_permit::Permit;

const QUOTA_TIMEOUT: Duration = Duration::from_secs(10);

/// Guest-only expiry block of the quota response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestExpiry {
    /// When the guest's oldest data expires.
    pub data_expires_at: DateTime<Utc>,
    /// Whole days until that happens.
    pub days_until_expiration: i64,
}

/// `POST /quota` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    /// Uploads used in the current window.
    pub used: u32,
    /// The applicable limit.
    pub limit: u32,
    /// Uploads remaining.
    pub remaining: u32,
    /// When the daily window resets.
    pub resets_at: DateTime<Utc>,
    /// The user's tier.
    pub tier: Tier,
    /// Present for guests only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest: Option<GuestExpiry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserBody<'a> {
    user_id: &'a UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PermitBody<'a> {
    user_id: &'a UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    valid_days: Option<i64>,
}

#[derive(Deserialize)]
struct PermitEnvelope {
    permit: Permit,
}

/// Client for `/quota` and `/permit`.
#[derive(Clone)]
pub struct QuotaApi {
    api: ApiClient,
}

impl QuotaApi {
    /// New client over the shared API plumbing.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Fetch the server's view of the user's quota.
    pub async fn fetch_quota(
        &self,
        user: &UserId,
        trace: &TraceId,
    ) -> Result<QuotaSnapshot, TransportError> {
        self.api
            .post_json("/quota", &UserBody { user_id: user }, trace, QUOTA_TIMEOUT)
            .await
    }

    /// Request a fresh permit.
    pub async fn request_permit(
        &self,
        user: &UserId,
        valid_days: Option<i64>,
        trace: &TraceId,
    ) -> Result<Permit, TransportError> {
        let body = PermitBody {
            user_id: user,
            valid_days,
        };
        let envelope: PermitEnvelope = self
            .api
            .post_json("/permit", &body, trace, QUOTA_TIMEOUT)
            .await?;
        Ok(envelope.permit)
    }
}
