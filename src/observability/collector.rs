//! Remote collector transport.
//!
//! Ships metric and log batches as JSON to a telemetry collector:
//!
//! ```text
//! POST {endpoint}/v1/metrics  {"namespace", "region", "metric_data": [MetricPoint]}
//! POST {endpoint}/v1/logs     {"log_group", "log_stream", "region", "events": [LogRecord]}
//! ```
//!
//! One client is shared by both workers; `reqwest::Client` pools connections
//! internally and is safe for concurrent use.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::AppConfig;
use crate::observability::dispatch::Sink;
use crate::observability::logging::LogRecord;
use crate::observability::metrics::MetricPoint;
use crate::observability::TransportError;

#[derive(Serialize)]
struct MetricBatch<'a> {
    namespace: &'a str,
    region: &'a str,
    metric_data: &'a [MetricPoint],
}

#[derive(Serialize)]
struct LogBatch<'a> {
    log_group: &'a str,
    log_stream: &'a str,
    region: &'a str,
    events: &'a [LogRecord],
}

/// JSON-over-HTTP client for the telemetry collector.
#[derive(Clone)]
pub struct CollectorClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    region: String,
    namespace: String,
    log_group: String,
    log_stream: String,
}

impl CollectorClient {
    /// Build a client from validated configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, TransportError> {
        let endpoint = config
            .sink
            .endpoint
            .clone()
            .ok_or_else(|| TransportError::Unreachable("no collector endpoint configured".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.sink.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: config.sink.api_key.clone(),
            region: config.sink.region.clone(),
            namespace: config.metrics.namespace.clone(),
            log_group: config.logs.log_group.clone(),
            log_stream: config.logs.log_stream.clone(),
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl Sink<MetricPoint> for CollectorClient {
    async fn publish(&self, batch: Vec<MetricPoint>) -> Result<(), TransportError> {
        let body = MetricBatch {
            namespace: &self.namespace,
            region: &self.region,
            metric_data: &batch,
        };
        self.post("/v1/metrics", &body).await
    }
}

#[async_trait]
impl Sink<LogRecord> for CollectorClient {
    async fn publish(&self, batch: Vec<LogRecord>) -> Result<(), TransportError> {
        let body = LogBatch {
            log_group: &self.log_group,
            log_stream: &self.log_stream,
            region: &self.region,
            events: &batch,
        };
        self.post("/v1/logs", &body).await
    }
}
