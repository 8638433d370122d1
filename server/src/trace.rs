//! Request logging.
//!
//! One INFO line per request: method and path from the span, status,
//! latency, and the response length once the handler finishes.

use std::time::Duration;

use axum::http::{header, Request, Response};
use tracing::Span;

pub fn make_span<B>(request: &Request<B>) -> Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

pub fn on_response<B>(response: &Response<B>, latency: Duration, _span: &Span) {
    let length = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::info!(
        status = response.status().as_u16(),
        length,
        latency_ms = latency.as_millis() as u64,
        "Request"
    );
}
