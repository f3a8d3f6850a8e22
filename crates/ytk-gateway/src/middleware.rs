// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack: trace propagation, request logging, CORS.

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;
use ytk_core::TraceId;

/// Header every request and response carries.
pub const TRACE_HEADER: &str = "x-trace-id";

/// Trace attached to the request, available as an Axum extension.
#[derive(Debug, Clone)]
pub struct TraceContext {
    /// The effective trace id.
    pub trace: TraceId,
    /// Whether the client supplied it in the header. Header beats body.
    pub from_header: bool,
}

impl TraceContext {
    /// Resolve the trace for a handler whose body may also carry one:
    /// header wins, then body, then the generated fallback.
    pub fn resolve(&self, body_trace: Option<&str>) -> TraceId {
        if self.from_header {
            return self.trace.clone();
        }
        body_trace
            .and_then(|raw| TraceId::new(raw).ok())
            .unwrap_or_else(|| self.trace.clone())
    }
}

/// Attach a [`TraceContext`] to the request and echo `X-Trace-Id` on the
/// response.
pub async fn trace_middleware(mut req: Request, next: Next) -> Response {
    let (trace, from_header) = match req
        .headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| TraceId::new(raw).ok())
    {
        Some(trace) => (trace, true),
        None => (TraceId::random(), false),
    };
    req.extensions_mut().insert(TraceContext {
        trace: trace.clone(),
        from_header,
    });

    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(trace.as_str()) {
        resp.headers_mut().insert(TRACE_HEADER, value);
    }
    resp
}

/// Log method, path, status, and duration with structured fields.
pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    resp
}

/// Permissive CORS for the local-first client: any origin, the JSON verbs,
/// and the trace header.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}
