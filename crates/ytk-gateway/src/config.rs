// SPDX-License-Identifier: MIT OR Apache-2.0
//! Gateway environment configuration.
//!
//! A missing permit-secret ARN is a fatal init error: the process must
//! refuse to start rather than serve unsigned permits.

use ytk_core::MIN_BATCH_IMAGES;

/// Errors from loading the gateway configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GatewayConfigError {
    /// A required variable is missing or empty.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable could not be interpreted.
    #[error("invalid value for {name}: {value:?}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Settings the cloud plane consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Object bucket identifier.
    pub bucket: String,
    /// Transactions table name.
    pub transactions_table: String,
    /// Quota counters table name.
    pub quotas_table: String,
    /// Batch jobs table name.
    pub batch_jobs_table: String,
    /// Control records table name.
    pub control_table: String,
    /// Vision model identifier.
    pub vision_model_id: String,
    /// ARN of the permit signing secret. Required.
    pub permit_secret_arn: String,
    /// Region the vision model runs in.
    pub model_region: String,
    /// Base URL presigned object URLs point at.
    pub object_base_url: String,
    /// Image count that triggers a batch submission.
    pub batch_threshold: usize,
}

impl GatewayConfig {
    /// Explicit constructor for tests and embedding.
    pub fn for_tests(permit_secret_arn: impl Into<String>) -> Self {
        Self {
            bucket: "yorutsuke-receipts".into(),
            transactions_table: "yorutsuke-transactions".into(),
            quotas_table: "yorutsuke-quotas".into(),
            batch_jobs_table: "yorutsuke-batch-jobs".into(),
            control_table: "yorutsuke-control".into(),
            vision_model_id: "vision-1".into(),
            permit_secret_arn: permit_secret_arn.into(),
            model_region: "ap-northeast-1".into(),
            object_base_url: "http://127.0.0.1:8080".into(),
            batch_threshold: MIN_BATCH_IMAGES,
        }
    }

    /// Load from the environment. Every `YTK_*` name below is required
    /// except the threshold, which defaults to [`MIN_BATCH_IMAGES`].
    pub fn from_env() -> Result<Self, GatewayConfigError> {
        fn required(name: &'static str) -> Result<String, GatewayConfigError> {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or(GatewayConfigError::Missing(name))
        }

        let batch_threshold = match std::env::var("YTK_BATCH_THRESHOLD") {
            Err(_) => MIN_BATCH_IMAGES,
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| GatewayConfigError::Invalid {
                    name: "YTK_BATCH_THRESHOLD",
                    value: raw.clone(),
                })?,
        };

        Ok(Self {
            bucket: required("YTK_BUCKET")?,
            transactions_table: required("YTK_TRANSACTIONS_TABLE")?,
            quotas_table: required("YTK_QUOTAS_TABLE")?,
            batch_jobs_table: required("YTK_BATCH_JOBS_TABLE")?,
            control_table: required("YTK_CONTROL_TABLE")?,
            vision_model_id: required("YTK_VISION_MODEL_ID")?,
            permit_secret_arn: required("YTK_PERMIT_SECRET_ARN")?,
            model_region: required("YTK_MODEL_REGION")?,
            object_base_url: required("YTK_OBJECT_BASE_URL")?,
            batch_threshold,
        })
    }
}
