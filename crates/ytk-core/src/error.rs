// SPDX-License-Identifier: MIT OR Apache-2.0
//! Closed error taxonomy shared by the client runtime and the cloud plane.
//!
//! Low-level adapters (storage, HTTP) surface their own structured errors;
//! domain modules translate them into an [`ErrorKind`] before anything
//! user-visible sees them. [`CoreError`] carries a kind, a message, an
//! optional cause, and structured context for diagnostics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Machine-readable, stable error kind.
///
/// Serialises to `SCREAMING_SNAKE_CASE`; the set is closed and the string
/// representations are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Connection failure or timeout. Retriable with bounded backoff.
    Network,
    /// Upstream 5xx. Retriable with bounded backoff.
    Server,
    /// Upload quota exhausted. Not retriable; prompts upgrade or wait.
    #[serde(rename = "QUOTA_EXCEEDED")]
    Quota,
    /// The stored permit has expired. Not retriable; re-issue flow.
    PermitExpired,
    /// Permit signature did not verify. Not retriable; security-logged.
    InvalidSignature,
    /// Untrusted payload failed schema validation. Row lands in
    /// `needs_review` instead of being discarded.
    Validation,
    /// Optimistic version check failed. Retriable after rebase.
    Conflict,
    /// The operation already happened; the duplicate is a no-op.
    IdempotentDuplicate,
    /// Catch-all for unclassified failures. Not retriable.
    Unknown,
}

impl ErrorKind {
    /// Stable string code (e.g. `"QUOTA_EXCEEDED"` for [`ErrorKind::Quota`]).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::Server => "SERVER",
            Self::Quota => "QUOTA_EXCEEDED",
            Self::PermitExpired => "PERMIT_EXPIRED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Validation => "VALIDATION",
            Self::Conflict => "CONFLICT",
            Self::IdempotentDuplicate => "IDEMPOTENT_DUPLICATE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether an operation failing with this kind may be retried.
    ///
    /// `Conflict` is retriable only after a rebase; the sync engine owns
    /// that dance.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Network | Self::Server | Self::Conflict)
    }

    /// Whether the failure surfaces in the UI at all.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Conflict | Self::IdempotentDuplicate)
    }

    /// Classify an HTTP response into the taxonomy.
    ///
    /// `code` is the machine-readable `error` field of the response body,
    /// when one was readable.
    pub fn from_http(status: u16, code: Option<&str>) -> Self {
        match code {
            Some("QUOTA_EXCEEDED") => return Self::Quota,
            Some("PERMIT_EXPIRED") => return Self::PermitExpired,
            Some("INVALID_SIGNATURE") => return Self::InvalidSignature,
            _ => {}
        }
        match status {
            429 => Self::Quota,
            408 => Self::Network,
            409 => Self::Conflict,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CoreError
// ---------------------------------------------------------------------------

/// Unified domain error.
///
/// # Builder usage
///
/// ```
/// use ytk_core::{CoreError, ErrorKind};
///
/// let err = CoreError::new(ErrorKind::Network, "upload timed out")
///     .with_context("image_id", "1738-a.jpg")
///     .with_context("timeout_secs", 60);
/// ```
pub struct CoreError {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Structured context for diagnostics. Deterministic ordering.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl CoreError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// Values that fail to serialise are silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.kind.is_retriable()`.
    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

impl fmt::Debug for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("CoreError");
        d.field("kind", &self.kind);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Structured failure of one HTTP exchange.
///
/// Adapters surface this; domain modules collapse it into an [`ErrorKind`]
/// via [`TransportError::kind`]. Timeouts are network errors by contract.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The deadline elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,
    /// Connection-level failure before any response.
    #[error("network error: {0}")]
    Network(String),
    /// The server answered with a non-success status.
    #[error("http {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Machine-readable `error` field of the body, when readable.
        code: Option<String>,
        /// Human-readable detail.
        message: String,
    },
}

impl TransportError {
    /// Collapse into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout | Self::Network(_) => ErrorKind::Network,
            Self::Http { status, code, .. } => ErrorKind::from_http(*status, code.as_deref()),
        }
    }
}
