//! Handler failures and the terminal error-capture stage.
//!
//! Handlers signal failure by returning `HandlerError` (or by panicking). The
//! instrumentation chain detects either and hands the request to `ErrorCapture`,
//! which is the only stage that runs afterwards:
//!
//! ```text
//! in-flight ──handler ok──▶ normal ──▶ responded (handler's own response)
//!     │
//!     └──handler failed──▶ failed ──▶ responded (uniform 500 JSON)
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::middleware::RequestContext;
use crate::observability::metrics::{MetricPoint, MetricUnit, ERROR_COUNT};
use crate::observability::{LogRecord, MetricEmitter, RequestLogger, SegmentOutcome};

/// Failure returned by a route handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Marker left in response extensions so the chain can tell a failure from a
/// handler that chose a 5xx status itself.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub message: String,
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let mut response = failure_response(&self.message);
        response.extensions_mut().insert(HandlerFailure {
            message: self.message,
        });
        response
    }
}

/// Body of every failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
}

/// The uniform failure response: 500 with `{"status":"error","message":...}`.
pub fn failure_response(message: &str) -> Response {
    let body = ErrorBody {
        status: "error".to_string(),
        message: message.to_string(),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Terminal stage for failed requests.
#[derive(Clone)]
pub struct ErrorCapture {
    metrics: MetricEmitter,
    logs: RequestLogger,
}

impl ErrorCapture {
    pub fn new(metrics: MetricEmitter, logs: RequestLogger) -> Self {
        Self { metrics, logs }
    }

    /// Record the failure and produce the client response.
    ///
    /// Consumes the request context, so a request can be captured at most once and
    /// never also completed.
    pub fn capture(&self, ctx: RequestContext, message: &str) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let latency_ms = ctx.elapsed_ms();

        self.logs.log(
            LogRecord::failed(&ctx.method, &ctx.path, status.as_u16(), latency_ms, message)
                .with_request_id(ctx.request_id.clone())
                .with_trace_id(ctx.trace_id()),
        );
        self.metrics.emit(MetricPoint::for_endpoint(
            ERROR_COUNT,
            1.0,
            MetricUnit::Count,
            &ctx.method,
            &ctx.route,
        ));

        ctx.close(SegmentOutcome::Failed {
            status: status.as_u16(),
        });
        failure_response(message)
    }
}

/// Extract a client-safe message from a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Internal server error".to_string()
    }
}
