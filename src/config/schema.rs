//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files. Every field
//! has a default so a minimal file (or no file plus environment overrides) is enough;
//! the deployment identifiers default to empty and are rejected by validation.

use serde::{Deserialize, Serialize};

/// Root configuration for the instrumented service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Metrics destination.
    pub metrics: MetricsConfig,

    /// Request log destination and process logging.
    pub logs: LogsConfig,

    /// Trace segment settings.
    pub tracing: TraceConfig,

    /// Remote sink location and credentials.
    pub sink: SinkConfig,

    /// Demo route settings.
    pub routes: RoutesConfig,

    /// Shutdown deadlines.
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// True when any telemetry stream ships to the remote collector.
    pub fn uses_collector(&self) -> bool {
        self.metrics.backend == MetricsBackend::Collector
            || self.logs.backend == LogBackend::Collector
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Bounded emission queue settings.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum items buffered before new items are dropped.
    pub capacity: usize,

    /// Maximum items handed to the sink in one publish.
    pub batch_size: usize,
}

impl QueueConfig {
    pub fn new(capacity: usize, batch_size: usize) -> Self {
        Self {
            capacity,
            batch_size,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            batch_size: 20,
        }
    }
}

/// Where metric points are published.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricsBackend {
    /// Recorded through the `metrics` facade and scraped from the Prometheus endpoint.
    #[default]
    Prometheus,
    /// Shipped in JSON batches to the remote collector.
    Collector,
    /// Written as structured log events.
    Log,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Fixed per-deployment namespace attached to every published batch.
    pub namespace: String,

    /// Destination for metric points.
    pub backend: MetricsBackend,

    /// Prometheus scrape endpoint bind address.
    pub prometheus_address: String,

    /// Emission queue.
    pub queue: QueueConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            backend: MetricsBackend::default(),
            prometheus_address: "0.0.0.0:9090".to_string(),
            queue: QueueConfig::default(),
        }
    }
}

/// Where request log records are published.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    /// Re-emitted as structured `tracing` events.
    #[default]
    Tracing,
    /// Shipped in JSON batches to the remote collector.
    Collector,
}

/// Request log and process logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Log group the request records belong to.
    pub log_group: String,

    /// Log stream within the group.
    pub log_stream: String,

    /// Destination for request records.
    pub backend: LogBackend,

    /// Process log level (trace, debug, info, warn, error).
    pub level: String,

    /// JSON output for process logs.
    pub json: bool,

    /// Emission queue.
    pub queue: QueueConfig,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            log_group: String::new(),
            log_stream: String::new(),
            backend: LogBackend::default(),
            level: "info".to_string(),
            json: false,
            queue: QueueConfig::new(4096, 50),
        }
    }
}

/// Trace segment configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TraceConfig {
    /// Service name every segment is opened under.
    pub service_name: String,
}

/// Remote collector settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Region reported with every batch.
    pub region: String,

    /// Collector base URL (e.g., "https://telemetry.internal:4318").
    pub endpoint: Option<String>,

    /// Bearer credential for the collector.
    pub api_key: Option<String>,

    /// Collector request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            endpoint: None,
            api_key: None,
            timeout_secs: 10,
        }
    }
}

/// Demo route settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutesConfig {
    /// Delay of the `/long-running` route in seconds.
    pub long_running_delay_secs: u64,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            long_running_delay_secs: 180,
        }
    }
}

/// Shutdown deadlines.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight requests may run after a shutdown signal.
    pub grace_secs: u64,

    /// How long telemetry workers may take to flush their queues.
    pub drain_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_secs: 30,
            drain_secs: 5,
        }
    }
}
