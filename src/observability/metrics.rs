//! Metric points, the emitter, and the built-in metric sinks.
//!
//! # Metrics
//! - `RequestCount` (Count): one per request, before the handler runs
//! - `Latency` (Milliseconds): one per normally completed request
//! - `ErrorCount` (Count): one per failed request
//!
//! Every point is dimensioned by `method` and `path`.
//!
//! # Design Decisions
//! - `MetricEmitter::emit` is a non-blocking queue hand-off (see `dispatch`)
//! - The namespace belongs to the sink, not the point: it is fixed per deployment
//! - `PrometheusSink` goes through the `metrics` facade so the exporter installed by
//!   `init_metrics` serves the scrape endpoint

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use metrics::Label;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::observability::dispatch::{DispatchSnapshot, Dispatcher, Sink};
use crate::observability::TransportError;

pub const REQUEST_COUNT: &str = "RequestCount";
pub const LATENCY: &str = "Latency";
pub const ERROR_COUNT: &str = "ErrorCount";

pub const DIM_METHOD: &str = "method";
pub const DIM_PATH: &str = "path";

/// Histogram buckets for latency, in milliseconds.
const LATENCY_BUCKETS_MS: &[f64] = &[
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0,
    30_000.0, 60_000.0, 180_000.0, 600_000.0,
];

/// Unit of a metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricUnit {
    Milliseconds,
    Seconds,
    Count,
    Bytes,
}

impl MetricUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricUnit::Milliseconds => "Milliseconds",
            MetricUnit::Seconds => "Seconds",
            MetricUnit::Count => "Count",
            MetricUnit::Bytes => "Bytes",
        }
    }
}

/// A single named, dimensioned observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    name: String,
    value: f64,
    unit: MetricUnit,
    dimensions: BTreeMap<String, String>,
    timestamp_ms: u64,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, value: f64, unit: MetricUnit) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
            dimensions: BTreeMap::new(),
            timestamp_ms: now_ms(),
        }
    }

    /// A point attributed to one endpoint.
    pub fn for_endpoint(
        name: impl Into<String>,
        value: f64,
        unit: MetricUnit,
        method: &str,
        path: &str,
    ) -> Self {
        Self::new(name, value, unit)
            .with_dimension(DIM_METHOD, method)
            .with_dimension(DIM_PATH, path)
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> MetricUnit {
        self.unit
    }

    pub fn dimensions(&self) -> &BTreeMap<String, String> {
        &self.dimensions
    }

    pub fn dimension(&self, key: &str) -> Option<&str> {
        self.dimensions.get(key).map(String::as_str)
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Shared handle that queues metric points for background publication.
#[derive(Clone)]
pub struct MetricEmitter {
    dispatcher: Dispatcher<MetricPoint>,
}

impl MetricEmitter {
    /// Start the emitter and its worker.
    pub fn spawn(
        sink: Arc<dyn Sink<MetricPoint>>,
        queue: QueueConfig,
        close: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, handle) = Dispatcher::spawn("metrics", sink, queue, close);
        (Self { dispatcher }, handle)
    }

    /// Queue a point. Never blocks and never fails the caller.
    pub fn emit(&self, point: MetricPoint) {
        self.dispatcher.dispatch(point);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        self.dispatcher.snapshot()
    }
}

/// Install the Prometheus exporter and its scrape listener.
///
/// Must run inside the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(LATENCY_BUCKETS_MS)?
        .install()?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint listening");
    Ok(())
}

/// Records points through the `metrics` facade.
///
/// `Count` points become counters, everything else a histogram. Names are turned
/// into snake case with the unit as suffix (`Latency` → `latency_milliseconds`).
pub struct PrometheusSink {
    namespace: String,
}

impl PrometheusSink {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn record(&self, point: &MetricPoint) {
        let mut labels: Vec<Label> = Vec::with_capacity(point.dimensions.len() + 1);
        labels.push(Label::new("namespace", self.namespace.clone()));
        for (key, value) in &point.dimensions {
            labels.push(Label::new(key.clone(), value.clone()));
        }

        let base = snake_case(&point.name);
        match point.unit {
            MetricUnit::Count => {
                metrics::counter!(format!("{}_total", base), labels).increment(point.value as u64);
            }
            unit => {
                let name = format!("{}_{}", base, unit.as_str().to_ascii_lowercase());
                metrics::histogram!(name, labels).record(point.value);
            }
        }
    }
}

#[async_trait]
impl Sink<MetricPoint> for PrometheusSink {
    async fn publish(&self, batch: Vec<MetricPoint>) -> Result<(), TransportError> {
        for point in &batch {
            self.record(point);
        }
        Ok(())
    }
}

/// Writes each point as a structured event on the `metrics` target.
pub struct LogMetricSink {
    namespace: String,
}

impl LogMetricSink {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl Sink<MetricPoint> for LogMetricSink {
    async fn publish(&self, batch: Vec<MetricPoint>) -> Result<(), TransportError> {
        for point in batch {
            let dimensions = serde_json::to_string(&point.dimensions)?;
            tracing::info!(
                target: "metrics",
                namespace = %self.namespace,
                metric = %point.name,
                value = point.value,
                unit = point.unit.as_str(),
                dimensions = %dimensions,
                "metric"
            );
        }
        Ok(())
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    out
}
