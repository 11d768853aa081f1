//! Request identity helpers.
//!
//! # Responsibilities
//! - Read the request ID assigned by the request-id layers
//! - Read the caller's trace context
//!
//! # Design Decisions
//! - Request ID added as early as possible (outermost layer) so every stage sees it
//! - A malformed `traceparent` is ignored and the request starts a fresh trace

use axum::http::{HeaderName, Request};

use crate::observability::tracing::{TraceContext, TRACEPARENT};

/// Header carrying the request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request ID set by the request-id layer, if any.
pub fn request_id<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Caller's trace context from the `traceparent` header.
pub fn trace_parent<B>(request: &Request<B>) -> Option<TraceContext> {
    request
        .headers()
        .get(TRACEPARENT)
        .and_then(|v| v.to_str().ok())
        .and_then(TraceContext::parse)
}
