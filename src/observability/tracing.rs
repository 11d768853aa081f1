//! Distributed tracing segments.
//!
//! # Responsibilities
//! - Extract the caller's trace context from the W3C `traceparent` header
//! - Open one segment per request, nested under the caller's span when present
//! - Close every segment exactly once, whatever way the request ends
//!
//! # Design Decisions
//! - `SegmentHandle` is an owned token: `close` consumes it, and `Drop` closes it as
//!   `Abandoned` if the request future was dropped first (client disconnect,
//!   shutdown deadline)
//! - Backend calls are synchronous so they can run from `Drop`; their failures are
//!   diagnostics, never request errors

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::observability::{TransportError, DIAGNOSTIC_TARGET};

/// Request header carrying the caller's trace context.
pub const TRACEPARENT: &str = "traceparent";

/// Position of a request within a distributed trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// 32 lowercase hex characters.
    pub trace_id: String,
    /// 16 lowercase hex characters identifying the span that sent the request.
    pub span_id: String,
    pub sampled: bool,
}

impl TraceContext {
    /// Parse a version-00 `traceparent` header value.
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != "00" {
            return None;
        }
        if !is_hex_id(trace_id, 32) || !is_hex_id(span_id, 16) || !is_hex(flags, 2) {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            sampled: flags & 0x01 == 0x01,
        })
    }

    /// Render as a `traceparent` header value.
    pub fn to_header(&self) -> String {
        format!(
            "00-{}-{}-{}",
            self.trace_id,
            self.span_id,
            if self.sampled { "01" } else { "00" }
        )
    }
}

fn is_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// All-zero ids are invalid.
fn is_hex_id(value: &str, len: usize) -> bool {
    is_hex(value, len) && value.chars().any(|c| c != '0')
}

/// Identity of one open or closed segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub service: Arc<str>,
    pub operation: String,
    pub trace_id: String,
    pub segment_id: String,
    pub parent_id: Option<String>,
    pub sampled: bool,
}

/// How a segment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Handler responded normally with this status.
    Completed { status: u16 },
    /// Handler failed; the uniform error response carried this status.
    Failed { status: u16 },
    /// The request ended before a response was produced.
    Abandoned,
}

impl fmt::Display for SegmentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentOutcome::Completed { status } => write!(f, "completed({})", status),
            SegmentOutcome::Failed { status } => write!(f, "failed({})", status),
            SegmentOutcome::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// Receives segment open/close events.
pub trait TraceBackend: Send + Sync + 'static {
    fn segment_opened(&self, segment: &Segment) -> Result<(), TransportError>;

    fn segment_closed(
        &self,
        segment: &Segment,
        outcome: SegmentOutcome,
        elapsed: Duration,
    ) -> Result<(), TransportError>;
}

/// Emits segment events on the `trace_segment` target.
#[derive(Debug, Default)]
pub struct LogTraceBackend;

impl TraceBackend for LogTraceBackend {
    fn segment_opened(&self, segment: &Segment) -> Result<(), TransportError> {
        tracing::debug!(
            target: "trace_segment",
            service = %segment.service,
            operation = %segment.operation,
            trace_id = %segment.trace_id,
            segment_id = %segment.segment_id,
            parent_id = segment.parent_id.as_deref(),
            "segment opened"
        );
        Ok(())
    }

    fn segment_closed(
        &self,
        segment: &Segment,
        outcome: SegmentOutcome,
        elapsed: Duration,
    ) -> Result<(), TransportError> {
        tracing::info!(
            target: "trace_segment",
            service = %segment.service,
            operation = %segment.operation,
            trace_id = %segment.trace_id,
            segment_id = %segment.segment_id,
            parent_id = segment.parent_id.as_deref(),
            outcome = %outcome,
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            "segment closed"
        );
        Ok(())
    }
}

/// Opens segments for one service. Shared by all requests.
#[derive(Clone)]
pub struct Tracer {
    service: Arc<str>,
    backend: Arc<dyn TraceBackend>,
}

impl Tracer {
    pub fn new(service: &str, backend: Arc<dyn TraceBackend>) -> Self {
        Self {
            service: Arc::from(service),
            backend,
        }
    }

    /// Open a segment, as a child of `parent` when the caller sent one.
    pub fn open(&self, operation: impl Into<String>, parent: Option<&TraceContext>) -> SegmentHandle {
        let segment = Segment {
            service: self.service.clone(),
            operation: operation.into(),
            trace_id: parent
                .map(|p| p.trace_id.clone())
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            segment_id: format!("{:016x}", fastrand::u64(1..)),
            parent_id: parent.map(|p| p.span_id.clone()),
            sampled: parent.map(|p| p.sampled).unwrap_or(true),
        };

        if let Err(e) = self.backend.segment_opened(&segment) {
            tracing::warn!(
                target: DIAGNOSTIC_TARGET,
                trace_id = %segment.trace_id,
                error = %e,
                "Trace backend rejected segment open"
            );
        }

        SegmentHandle {
            segment,
            started: Instant::now(),
            backend: self.backend.clone(),
            closed: false,
        }
    }
}

/// Ownership token for one open segment.
pub struct SegmentHandle {
    segment: Segment,
    started: Instant,
    backend: Arc<dyn TraceBackend>,
    closed: bool,
}

impl SegmentHandle {
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Context to propagate to anything this request calls.
    pub fn context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.segment.trace_id.clone(),
            span_id: self.segment.segment_id.clone(),
            sampled: self.segment.sampled,
        }
    }

    /// Close the segment with the given outcome.
    pub fn close(mut self, outcome: SegmentOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: SegmentOutcome) {
        if self.closed {
            return;
        }
        self.closed = true;

        let elapsed = self.started.elapsed();
        if let Err(e) = self.backend.segment_closed(&self.segment, outcome, elapsed) {
            tracing::warn!(
                target: DIAGNOSTIC_TARGET,
                trace_id = %self.segment.trace_id,
                error = %e,
                "Trace backend rejected segment close"
            );
        }
    }
}

impl Drop for SegmentHandle {
    fn drop(&mut self) {
        self.finish(SegmentOutcome::Abandoned);
    }
}
