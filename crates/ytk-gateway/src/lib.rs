// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP control plane: the presign + quota gate, permit issuance, batch
//! OCR endpoints, transaction sync, admin controls, and (in self-hosted
//! mode) the object PUT endpoint that feeds the instant processor.

#![deny(unsafe_code)]

pub mod admin;
pub mod batch;
pub mod config;
pub mod control;
pub mod middleware;
pub mod objects;
pub mod permits;
pub mod presign;
pub mod sync;

pub use config::{GatewayConfig, GatewayConfigError};
pub use control::{ControlRecord, ControlStore};
pub use middleware::{TRACE_HEADER, TraceContext};

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use ytk_ocr::{BatchOrchestrator, InstantProcessor, VisionModel};
use ytk_permit::{KeyRing, PermitIssuer, SecretFetchError, SecretSource};
use ytk_store::{BatchJobRepo, Clock, KvStore, ObjectStore, TransactionRepo};

/// Fatal initialisation failures: the process refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// The permit secret ARN is missing or unresolvable.
    #[error("permit secret unavailable: {0}")]
    PermitSecret(#[from] SecretFetchError),
    /// The resolved secret holds no keys.
    #[error("permit secret at {arn} holds no signing keys")]
    EmptyKeyRing {
        /// The offending ARN.
        arn: String,
    },
    /// The control table could not be read.
    #[error("control table unreadable: {0}")]
    ControlTable(#[from] ytk_store::StoreError),
}

/// Shared state behind every handler.
pub struct AppState {
    /// Gateway settings.
    pub config: GatewayConfig,
    /// Permit signing/verification keys.
    pub ring: KeyRing,
    /// Permit issuance.
    pub issuer: PermitIssuer,
    /// Object storage.
    pub objects: Arc<dyn ObjectStore>,
    /// Cloud transactions table.
    pub transactions: Arc<dyn TransactionRepo>,
    /// Batch job records.
    pub jobs: Arc<dyn BatchJobRepo>,
    /// Emergency-stop cell.
    pub control: ControlStore,
    /// Legacy per-day quota counters.
    pub counters: Arc<dyn KvStore>,
    /// Clock.
    pub clock: Arc<dyn Clock>,
    /// Batch orchestrator.
    pub orchestrator: BatchOrchestrator,
    /// Instant OCR processor.
    pub instant: InstantProcessor,
    /// Presigned tokens already consumed (single-use enforcement).
    pub used_grants: Mutex<HashSet<String>>,
    /// Process start, for `/health`.
    pub started_at: Instant,
}

impl AppState {
    /// Resolve secrets and assemble the state. Fatal errors here must
    /// abort startup.
    pub async fn init(
        config: GatewayConfig,
        secrets: &dyn SecretSource,
        objects: Arc<dyn ObjectStore>,
        transactions: Arc<dyn TransactionRepo>,
        jobs: Arc<dyn BatchJobRepo>,
        control_kv: Arc<dyn KvStore>,
        counters: Arc<dyn KvStore>,
        vision: Arc<dyn VisionModel>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, InitError> {
        let keys = secrets.fetch_keys(&config.permit_secret_arn).await?;
        let ring = KeyRing::new(keys).ok_or_else(|| InitError::EmptyKeyRing {
            arn: config.permit_secret_arn.clone(),
        })?;

        let control = ControlStore::new(control_kv);
        // An unreadable control table is fatal: serving with an unknown
        // emergency-stop state is worse than not serving.
        control.read().await?;

        let orchestrator = BatchOrchestrator::with_threshold(
            jobs.clone(),
            objects.clone(),
            vision.clone(),
            clock.clone(),
            config.batch_threshold,
        );
        let instant =
            InstantProcessor::new(objects.clone(), transactions.clone(), vision, clock.clone());

        Ok(Arc::new(Self {
            issuer: PermitIssuer::new(ring.clone()),
            ring,
            objects,
            transactions,
            jobs,
            control,
            counters,
            clock,
            orchestrator,
            instant,
            used_grants: Mutex::new(HashSet::new()),
            started_at: Instant::now(),
            config,
        }))
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/presign", post(presign::cmd_presign))
        .route("/permit", post(permits::cmd_issue_permit))
        .route("/quota", post(permits::cmd_quota))
        .route("/batch/submit", post(batch::cmd_submit))
        .route("/batch/jobs/{job_id}", get(batch::cmd_job_status))
        .route(
            "/admin/control",
            get(admin::cmd_control_read).post(admin::cmd_control_write),
        )
        .route("/admin/delete-data", post(admin::cmd_delete_data))
        .route("/sync/push", post(sync::cmd_push))
        .route("/sync/pull", post(sync::cmd_pull))
        .route("/objects/{*key}", put(objects::cmd_put_object).get(objects::cmd_get_object))
        .layer(axum::middleware::from_fn(middleware::trace_middleware))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(middleware::cors_layer())
        .with_state(state)
}

async fn cmd_health(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "contractVersion": ytk_core::CONTRACT_VERSION,
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "time": Utc::now().to_rfc3339(),
    }))
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Structured API error returned on failure.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status.
    pub status: StatusCode,
    /// Stable machine-readable code (e.g. `QUOTA_EXCEEDED`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Set on errors the client should retry shortly.
    pub retryable: bool,
}

impl ApiError {
    /// Generic constructor.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// 400 — malformed or invalid parameter.
    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_PARAM", message)
    }

    /// 403 — quota exhausted.
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "QUOTA_EXCEEDED", message)
    }

    /// 403 — permit expired.
    pub fn permit_expired() -> Self {
        Self::new(StatusCode::FORBIDDEN, "PERMIT_EXPIRED", "permit has expired")
    }

    /// 403 — signature did not verify.
    pub fn invalid_signature() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "INVALID_SIGNATURE",
            "permit signature does not verify",
        )
    }

    /// 404 — no such resource.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 409 — concurrent duplicate; retry shortly.
    pub fn conflict_retryable(message: impl Into<String>) -> Self {
        let mut err = Self::new(StatusCode::CONFLICT, "CONFLICT", message);
        err.retryable = true;
        err
    }

    /// 503 — emergency stop is active.
    pub fn service_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "service temporarily unavailable",
        )
    }

    /// 500 — unexpected internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.code, "message": self.message });
        if self.retryable {
            body["retryable"] = json!(true);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<ytk_store::StoreError> for ApiError {
    fn from(err: ytk_store::StoreError) -> Self {
        ApiError::internal(err.to_string())
    }
}
