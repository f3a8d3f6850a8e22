// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP implementations of the upload worker's cloud capabilities.

use crate::api::ApiClient;
use async_trait::async_trait;
use std::time::Duration;
use ytk_core::{TransportError, UPLOAD_TIMEOUT_SECS};
use ytk_queue::{BlobUploader, PresignGate, PresignRequest, PresignedUpload};

/// Deadline for the presign round-trip itself.
const PRESIGN_TIMEOUT: Duration = Duration::from_secs(10);

/// `POST /presign` against the quota gate.
#[derive(Clone)]
pub struct HttpPresignGate {
    api: ApiClient,
}

impl HttpPresignGate {
    /// New gate over the shared API client.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PresignGate for HttpPresignGate {
    async fn presign_upload(
        &self,
        req: &PresignRequest,
    ) -> Result<PresignedUpload, TransportError> {
        self.api
            .post_json_idempotent("/presign", req, &req.trace_id, &req.intent_id, PRESIGN_TIMEOUT)
            .await
    }
}

/// PUT to the presigned URL with the 60-second upload deadline.
#[derive(Clone)]
pub struct HttpBlobUploader {
    api: ApiClient,
}

impl HttpBlobUploader {
    /// New uploader over the shared API client.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl BlobUploader for HttpBlobUploader {
    async fn upload(
        &self,
        grant: &PresignedUpload,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), TransportError> {
        self.api
            .put_bytes(
                &grant.url,
                bytes,
                content_type,
                &grant.trace_id,
                Duration::from_secs(UPLOAD_TIMEOUT_SECS),
            )
            .await
    }
}
