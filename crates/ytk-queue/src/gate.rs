// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client-side capabilities the worker needs from the cloud.
//!
//! Concrete implementations live in `ytk-client` (HTTP) and in tests
//! (scripted). Presigned URLs are single-use: every upload attempt obtains
//! a fresh one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ytk_core::{IntentId, TraceId, TransportError, UserId};
use ytk_permit::Permit;

/// Request for a presigned upload URL.
///
/// Serialize-only: the gate defines its own deserialization envelope. The
/// trace and intent travel in headers, not the body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    /// Uploading user.
    pub user_id: UserId,
    /// Original file name; the gate embeds it in the object key.
    pub file_name: String,
    /// MIME type of the payload.
    pub content_type: String,
    /// Attached permit, when one is stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permit: Option<Permit>,
    /// Trace carried in the `X-Trace-Id` header and object metadata.
    #[serde(skip)]
    pub trace_id: TraceId,
    /// Idempotency key derived from the image id.
    #[serde(skip)]
    pub intent_id: IntentId,
}

/// A presigned PUT grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    /// Where to PUT the bytes.
    pub url: String,
    /// Object key the gate allocated.
    pub key: String,
    /// Trace echoed by the gate.
    pub trace_id: TraceId,
}

/// Obtains presigned upload URLs from the quota gate.
#[async_trait]
pub trait PresignGate: Send + Sync {
    /// Request a presigned PUT URL for one upload.
    async fn presign_upload(&self, req: &PresignRequest)
    -> Result<PresignedUpload, TransportError>;
}

/// Puts blobs to presigned URLs.
#[async_trait]
pub trait BlobUploader: Send + Sync {
    /// PUT `bytes` to the presigned URL. Implementations enforce the
    /// 60-second client deadline and map timeouts to
    /// [`TransportError::Timeout`].
    async fn upload(
        &self,
        grant: &PresignedUpload,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), TransportError>;
}
