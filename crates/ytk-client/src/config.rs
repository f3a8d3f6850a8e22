// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client-side environment configuration.

/// Default trace header name.
pub const DEFAULT_TRACE_HEADER: &str = "X-Trace-Id";

/// Errors from loading the client configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClientConfigError {
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

/// Settings the client runtime consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the cloud API (no trailing slash).
    pub api_base_url: String,
    /// When set, HTTP adapters are replaced by local mocks.
    pub mock_mode: bool,
    /// Header name carrying the trace id.
    pub trace_header: String,
}

impl ClientConfig {
    /// Explicit constructor for tests and embedding.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        let mut api_base_url = api_base_url.into();
        while api_base_url.ends_with('/') {
            api_base_url.pop();
        }
        Self {
            api_base_url,
            mock_mode: false,
            trace_header: DEFAULT_TRACE_HEADER.to_string(),
        }
    }

    /// Load from the environment: `YTK_API_BASE_URL` (required),
    /// `YTK_MOCK_MODE`, `YTK_TRACE_HEADER`.
    pub fn from_env() -> Result<Self, ClientConfigError> {
        let base = std::env::var("YTK_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ClientConfigError::Missing("YTK_API_BASE_URL"))?;
        let mut config = Self::new(base);

        if let Ok(raw) = std::env::var("YTK_MOCK_MODE") {
            config.mock_mode = match raw.trim() {
                "" | "0" | "false" | "no" => false,
                "1" | "true" | "yes" => true,
                other => {
                    return Err(ClientConfigError::Invalid {
                        name: "YTK_MOCK_MODE",
                        value: other.to_string(),
                    });
                }
            };
        }
        if let Ok(header) = std::env::var("YTK_TRACE_HEADER") {
            if !header.trim().is_empty() {
                config.trace_header = header;
            }
        }
        Ok(config)
    }
}
