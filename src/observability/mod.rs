//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! InstrumentationChain (per request)
//!     → metrics.rs  MetricEmitter  ─┐
//!     → logging.rs  RequestLogger  ─┼→ dispatch.rs (bounded queue + worker) → sink
//!     → tracing.rs  Tracer / SegmentHandle → trace backend (synchronous)
//!
//! Sinks:
//!     → PrometheusSink / LogMetricSink / CollectorClient   (metrics)
//!     → TracingLogSink / CollectorClient                   (request logs)
//!     → LogTraceBackend                                    (segments)
//! ```
//!
//! # Design Decisions
//! - Clients are built once at startup and injected; nothing here is a global
//! - Telemetry failures are diagnostics on `telemetry::diagnostic`, never request errors
//! - The request path only ever enqueues; publication happens on worker tasks

pub mod collector;
pub mod dispatch;
pub mod logging;
pub mod metrics;
pub mod tracing;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, LogBackend, MetricsBackend};
use crate::lifecycle::Shutdown;

pub use self::collector::CollectorClient;
pub use self::dispatch::{DispatchSnapshot, Sink};
pub use self::logging::{LogLevel, LogRecord, RequestLogger, TracingLogSink};
pub use self::metrics::{LogMetricSink, MetricEmitter, MetricPoint, MetricUnit, PrometheusSink};
pub use self::tracing::{
    LogTraceBackend, Segment, SegmentHandle, SegmentOutcome, TraceBackend, TraceContext, Tracer,
};

/// Target for swallowed telemetry failures.
pub const DIAGNOSTIC_TARGET: &str = "telemetry::diagnostic";

/// A telemetry sink could not accept data.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("sink unreachable: {0}")]
    Unreachable(String),

    #[error("sink rejected batch with status {status}")]
    Rejected { status: u16 },

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink panicked while publishing")]
    SinkPanicked,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Unreachable(e.to_string())
    }
}

/// Process-scoped telemetry clients, shared by every request.
#[derive(Clone)]
pub struct Telemetry {
    pub metrics: MetricEmitter,
    pub logs: RequestLogger,
    pub tracer: Tracer,
}

/// The sinks a `Telemetry` publishes to.
pub struct TelemetrySinks {
    pub metrics: Arc<dyn Sink<MetricPoint>>,
    pub logs: Arc<dyn Sink<LogRecord>>,
    pub traces: Arc<dyn TraceBackend>,
}

impl TelemetrySinks {
    /// Select the sinks named by the configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, TransportError> {
        let collector = if config.uses_collector() {
            Some(CollectorClient::from_config(config)?)
        } else {
            None
        };

        let metrics: Arc<dyn Sink<MetricPoint>> = match (config.metrics.backend, &collector) {
            (MetricsBackend::Collector, Some(client)) => Arc::new(client.clone()),
            (MetricsBackend::Log, _) => Arc::new(LogMetricSink::new(&config.metrics.namespace)),
            _ => Arc::new(PrometheusSink::new(&config.metrics.namespace)),
        };

        let logs: Arc<dyn Sink<LogRecord>> = match (config.logs.backend, &collector) {
            (LogBackend::Collector, Some(client)) => Arc::new(client.clone()),
            _ => Arc::new(TracingLogSink::new(
                &config.logs.log_group,
                &config.logs.log_stream,
            )),
        };

        Ok(Self {
            metrics,
            logs,
            traces: Arc::new(LogTraceBackend),
        })
    }
}

impl Telemetry {
    /// Spawn the emission workers and return the shared clients.
    pub fn start(config: &AppConfig, sinks: TelemetrySinks) -> (Self, TelemetryWorkers) {
        let close = Shutdown::new();

        let (metrics, metrics_worker) =
            MetricEmitter::spawn(sinks.metrics, config.metrics.queue, close.subscribe());
        let (logs, logs_worker) =
            RequestLogger::spawn(sinks.logs, config.logs.queue, close.subscribe());
        let tracer = Tracer::new(&config.tracing.service_name, sinks.traces);

        let workers = TelemetryWorkers {
            close,
            handles: vec![("metrics", metrics_worker), ("logs", logs_worker)],
        };

        (
            Self {
                metrics,
                logs,
                tracer,
            },
            workers,
        )
    }
}

/// Handles to the background emission workers.
#[must_use = "call `shutdown` to flush queued telemetry before exit"]
pub struct TelemetryWorkers {
    close: Shutdown,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl TelemetryWorkers {
    /// Close the queues and wait for the workers to flush what they hold.
    pub async fn shutdown(self, deadline: Duration) {
        self.close.trigger();

        for (name, handle) in self.handles {
            match tokio::time::timeout(deadline, handle).await {
                Ok(Ok(())) => ::tracing::debug!(queue = name, "Telemetry worker drained"),
                Ok(Err(e)) => ::tracing::warn!(
                    target: DIAGNOSTIC_TARGET,
                    queue = name,
                    error = %e,
                    "Telemetry worker ended abnormally"
                ),
                Err(_) => ::tracing::warn!(
                    target: DIAGNOSTIC_TARGET,
                    queue = name,
                    deadline_secs = deadline.as_secs(),
                    "Telemetry worker did not drain before deadline"
                ),
            }
        }
    }
}
