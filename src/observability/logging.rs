//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the process-wide `tracing` subscriber
//! - Define the per-request `LogRecord`
//! - Queue request records for the configured log sink
//!
//! # Design Decisions
//! - `RUST_LOG` takes precedence over the configured level
//! - JSON format for production, plain format for development
//! - Request records never wait on the sink: `RequestLogger::log` only enqueues

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogsConfig, QueueConfig};
use crate::observability::dispatch::{DispatchSnapshot, Dispatcher, Sink};
use crate::observability::metrics::now_ms;
use crate::observability::TransportError;

/// Install the global subscriber.
pub fn init_logging(config: &LogsConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    }
}

/// Severity of a request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// One structured record per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub message: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub trace_id: String,
}

impl LogRecord {
    /// Access-log record for a request that completed normally.
    pub fn completed(method: &str, path: &str, status: u16, latency_ms: f64) -> Self {
        Self {
            timestamp_ms: now_ms(),
            level: LogLevel::Info,
            message: format!("{} {} {} {:.0}ms", method, path, status, latency_ms),
            method: method.to_string(),
            path: path.to_string(),
            status,
            latency_ms,
            error: None,
            request_id: None,
            trace_id: String::new(),
        }
    }

    /// Error record for a request whose handler failed.
    pub fn failed(method: &str, path: &str, status: u16, latency_ms: f64, error: &str) -> Self {
        Self {
            timestamp_ms: now_ms(),
            level: LogLevel::Error,
            message: format!("Error: {}", error),
            method: method.to_string(),
            path: path.to_string(),
            status,
            latency_ms,
            error: Some(error.to_string()),
            request_id: None,
            trace_id: String::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }
}

/// Shared handle that queues request records for background publication.
#[derive(Clone)]
pub struct RequestLogger {
    dispatcher: Dispatcher<LogRecord>,
}

impl RequestLogger {
    /// Start the logger and its worker.
    pub fn spawn(
        sink: Arc<dyn Sink<LogRecord>>,
        queue: QueueConfig,
        close: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, handle) = Dispatcher::spawn("logs", sink, queue, close);
        (Self { dispatcher }, handle)
    }

    /// Queue a record. Never blocks and never fails the caller.
    pub fn log(&self, record: LogRecord) {
        self.dispatcher.dispatch(record);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        self.dispatcher.snapshot()
    }
}

/// Re-emits request records as structured events on the `access_log` target,
/// tagged with the configured log group and stream.
pub struct TracingLogSink {
    log_group: String,
    log_stream: String,
}

impl TracingLogSink {
    pub fn new(log_group: impl Into<String>, log_stream: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            log_stream: log_stream.into(),
        }
    }

    fn write(&self, record: &LogRecord) {
        macro_rules! access_event {
            ($level:expr) => {
                tracing::event!(
                    target: "access_log",
                    $level,
                    log_group = %self.log_group,
                    log_stream = %self.log_stream,
                    method = %record.method,
                    path = %record.path,
                    status = record.status,
                    latency_ms = record.latency_ms,
                    error = record.error.as_deref(),
                    request_id = record.request_id.as_deref(),
                    trace_id = %record.trace_id,
                    "{}",
                    record.message
                )
            };
        }

        match record.level {
            LogLevel::Info => access_event!(tracing::Level::INFO),
            LogLevel::Error => access_event!(tracing::Level::ERROR),
        }
    }
}

#[async_trait]
impl Sink<LogRecord> for TracingLogSink {
    async fn publish(&self, batch: Vec<LogRecord>) -> Result<(), TransportError> {
        for record in &batch {
            self.write(record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_record() {
        let record = LogRecord::completed("GET", "/", 200, 3.4)
            .with_request_id(Some("req-1".into()))
            .with_trace_id("abc");
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(record.message, "GET / 200 3ms");
        assert_eq!(record.error, None);
        assert_eq!(record.request_id.as_deref(), Some("req-1"));
        assert_eq!(record.trace_id, "abc");
    }

    #[test]
    fn test_failed_record_serializes_error() {
        let record = LogRecord::failed("GET", "/error", 500, 1.0, "This is a deliberate error");
        assert_eq!(record.message, "Error: This is a deliberate error");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["level"], "error");
        assert_eq!(json["status"], 500);
        assert_eq!(json["path"], "/error");
        assert_eq!(json["error"], "This is a deliberate error");
        assert!(json.get("request_id").is_none());
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_every_level() {
        let sink = TracingLogSink::new("group", "stream");
        let batch = vec![
            LogRecord::completed("GET", "/", 200, 1.0),
            LogRecord::completed("GET", "/slow", 200, 10.0),
            LogRecord::failed("GET", "/error", 500, 1.0, "boom"),
        ];
        assert!(sink.publish(batch).await.is_ok());
    }
}
