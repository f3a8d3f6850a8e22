// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared JSON-over-HTTP plumbing.

use crate::config::ClientConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use ytk_core::{IntentId, TraceId, TransportError};

/// Header carrying the idempotency key of side-effectful calls.
pub const INTENT_HEADER: &str = "X-Intent-Id";

/// Thin reqwest wrapper: base URL, trace header, per-call deadlines, and
/// uniform error mapping.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    trace_header: String,
}

impl ApiClient {
    /// Build from configuration.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: config.api_base_url.clone(),
            trace_header: config.trace_header.clone(),
        }
    }

    /// The configured trace header name.
    pub fn trace_header(&self) -> &str {
        &self.trace_header
    }

    /// POST a JSON body, expecting a JSON response, within `deadline`.
    pub async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        trace: &TraceId,
        deadline: Duration,
    ) -> Result<R, TransportError> {
        self.post_json_inner(path, body, trace, None, deadline).await
    }

    /// POST with an idempotency key in the `X-Intent-Id` header.
    pub async fn post_json_idempotent<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        trace: &TraceId,
        intent: &IntentId,
        deadline: Duration,
    ) -> Result<R, TransportError> {
        self.post_json_inner(path, body, trace, Some(intent), deadline)
            .await
    }

    async fn post_json_inner<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        trace: &TraceId,
        intent: Option<&IntentId>,
        deadline: Duration,
    ) -> Result<R, TransportError> {
        let url = format!("{}{}", self.base, path);
        let mut request = self
            .http
            .post(url)
            .timeout(deadline)
            .header(self.trace_header.as_str(), trace.as_str());
        if let Some(intent) = intent {
            request = request.header(INTENT_HEADER, intent.as_str());
        }
        let response = request
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(map_reqwest_error);
        }

        // Pull the machine-readable code out of the error body when there
        // is one.
        let text = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string));
        Err(TransportError::Http {
            status: status.as_u16(),
            code,
            message: text,
        })
    }

    /// PUT raw bytes to an absolute URL (presigned uploads), within
    /// `deadline`.
    pub async fn put_bytes(
        &self,
        url: &str,
        bytes: Vec<u8>,
        content_type: &str,
        trace: &TraceId,
        deadline: Duration,
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .put(url)
            .timeout(deadline)
            .header(self.trace_header.as_str(), trace.as_str())
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string));
        Err(TransportError::Http {
            status: status.as_u16(),
            code,
            message: text,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}
