//! Request instrumentation middleware.
//!
//! # Stages
//! ```text
//! pre-handler   begin()     open segment, start timer, emit RequestCount
//! handler       next.run()  opaque; may suspend for any length of time
//! post-handler  complete()  emit Latency, log at info, close segment;
//!                           runs once the response body has been fully sent
//! error-only    ErrorCapture::capture()
//!                           log at error, emit ErrorCount, close segment,
//!                           replace the response with the uniform failure body
//! ```
//!
//! `begin` produces the `RequestContext`; `complete` and `capture` both consume it,
//! so exactly one of them can run for a request and neither can run before the
//! handler. If the request future or the response body is dropped early the context
//! is dropped with it: nothing further is emitted and the segment closes as
//! `Abandoned`.
//!
//! Metric dimensions use the matched route template. Requests that match no route
//! share the `UNMATCHED_ROUTE` label so arbitrary URLs cannot mint new series.
//!
//! No deadline is applied to the handler.

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt;
use http_body::{Frame, SizeHint};
use tokio::time::Instant;
use tracing::Instrument;

use crate::http::error::{panic_message, ErrorCapture, HandlerFailure};
use crate::http::request::{request_id, trace_parent};
use crate::observability::metrics::{LATENCY, REQUEST_COUNT};
use crate::observability::{
    LogRecord, MetricEmitter, MetricPoint, MetricUnit, RequestLogger, SegmentHandle,
    SegmentOutcome, Telemetry, Tracer,
};

/// `path` dimension for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Per-request state, owned by the chain for the lifetime of one request.
pub struct RequestContext {
    pub method: String,
    /// Route template, or `UNMATCHED_ROUTE`. Used for metric dimensions.
    pub route: String,
    /// Request path as received. Used in log records.
    pub path: String,
    pub request_id: Option<String>,
    started: Instant,
    segment: SegmentHandle,
}

impl RequestContext {
    /// Milliseconds since the request entered the chain, on the monotonic clock.
    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    pub fn trace_id(&self) -> &str {
        &self.segment.segment().trace_id
    }

    fn span(&self) -> tracing::Span {
        let segment = self.segment.segment();
        tracing::info_span!(
            "request",
            method = %self.method,
            route = %self.route,
            path = %self.path,
            trace_id = %segment.trace_id,
            segment_id = %segment.segment_id,
            request_id = self.request_id.as_deref(),
        )
    }

    /// Close the request's trace segment.
    pub fn close(self, outcome: SegmentOutcome) {
        self.segment.close(outcome);
    }
}

/// The ordered instrumentation stages around every route.
#[derive(Clone)]
pub struct InstrumentationChain {
    metrics: MetricEmitter,
    logs: RequestLogger,
    tracer: Tracer,
    errors: ErrorCapture,
}

impl InstrumentationChain {
    pub fn new(telemetry: &Telemetry) -> Self {
        Self {
            metrics: telemetry.metrics.clone(),
            logs: telemetry.logs.clone(),
            tracer: telemetry.tracer.clone(),
            errors: ErrorCapture::new(telemetry.metrics.clone(), telemetry.logs.clone()),
        }
    }

    /// Run `next` inside the full instrumentation chain.
    pub async fn handle(&self, mut request: Request<Body>, next: Next) -> Response {
        let ctx = self.begin(&mut request);
        let span = ctx.span();

        let outcome = AssertUnwindSafe(next.run(request))
            .catch_unwind()
            .instrument(span)
            .await;

        match outcome {
            Ok(mut response) => match response.extensions_mut().remove::<HandlerFailure>() {
                Some(failure) => self.errors.capture(ctx, &failure.message),
                None if ctx.method == "HEAD" => {
                    // No body will be sent.
                    self.complete(ctx, response.status());
                    response
                }
                None => {
                    let completion = Completion {
                        chain: self.clone(),
                        ctx,
                        status: response.status(),
                    };
                    response.map(|body| {
                        Body::new(InstrumentedBody {
                            inner: body,
                            completion: Some(completion),
                        })
                    })
                }
            },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.errors.capture(ctx, &message)
            }
        }
    }

    /// Pre-handler stage.
    fn begin(&self, request: &mut Request<Body>) -> RequestContext {
        let started = Instant::now();

        let method = request.method().to_string();
        let path = request.uri().path().to_string();
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

        let parent = trace_parent(request);
        let segment = self
            .tracer
            .open(format!("{} {}", method, route), parent.as_ref());
        request.extensions_mut().insert(segment.context());

        self.metrics.emit(MetricPoint::for_endpoint(
            REQUEST_COUNT,
            1.0,
            MetricUnit::Count,
            &method,
            &route,
        ));

        RequestContext {
            request_id: request_id(request),
            method,
            route,
            path,
            started,
            segment,
        }
    }

    /// Post-handler stage for a normal completion.
    fn complete(&self, ctx: RequestContext, status: StatusCode) {
        let latency_ms = ctx.elapsed_ms();

        self.metrics.emit(MetricPoint::for_endpoint(
            LATENCY,
            latency_ms,
            MetricUnit::Milliseconds,
            &ctx.method,
            &ctx.route,
        ));
        self.logs.log(
            LogRecord::completed(&ctx.method, &ctx.path, status.as_u16(), latency_ms)
                .with_request_id(ctx.request_id.clone())
                .with_trace_id(ctx.trace_id()),
        );

        ctx.close(SegmentOutcome::Completed {
            status: status.as_u16(),
        });
    }
}

struct Completion {
    chain: InstrumentationChain,
    ctx: RequestContext,
    status: StatusCode,
}

/// Response body that runs the post-handler stage once the inner body has ended.
///
/// A body error or an early drop discards the completion, which abandons the
/// segment.
struct InstrumentedBody {
    inner: Body,
    completion: Option<Completion>,
}

impl InstrumentedBody {
    fn finish(&mut self) {
        if let Some(Completion { chain, ctx, status }) = self.completion.take() {
            chain.complete(ctx, status);
        }
    }
}

impl HttpBody for InstrumentedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => this.finish(),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.finish(),
            Poll::Ready(Some(Err(_))) => this.completion = None,
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for InstrumentedBody {
    fn drop(&mut self) {
        // Empty bodies may never be polled.
        if self.inner.is_end_stream() {
            self.finish();
        }
    }
}

/// Axum middleware entry point: `middleware::from_fn_with_state(chain, instrument)`.
pub async fn instrument(
    State(chain): State<InstrumentationChain>,
    request: Request<Body>,
    next: Next,
) -> Response {
    chain.handle(request, next).await
}
