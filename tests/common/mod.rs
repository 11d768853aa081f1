//! Shared utilities for integration tests: recording and failing sinks, and an
//! in-process app harness.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use tower::ServiceExt;

use request_telemetry::config::{AppConfig, MetricsBackend};
use request_telemetry::http::{instrumented, HttpServer, InstrumentationChain};
use request_telemetry::observability::{
    LogRecord, MetricPoint, Segment, SegmentOutcome, Sink, TraceBackend, TransportError,
};
use request_telemetry::{Telemetry, TelemetrySinks, TelemetryWorkers};

/// A valid configuration with small queues and a log metrics backend.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.metrics.namespace = "Demo/Api".into();
    config.metrics.backend = MetricsBackend::Log;
    config.logs.log_group = "demo-api".into();
    config.logs.log_stream = "test".into();
    config.tracing.service_name = "demo-api".into();
    config
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Keeps every item it receives.
pub struct RecordingSink<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for RecordingSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T: Clone> RecordingSink<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }
}

#[async_trait]
impl<T: Send + 'static> Sink<T> for RecordingSink<T> {
    async fn publish(&self, batch: Vec<T>) -> Result<(), TransportError> {
        self.items.lock().unwrap().extend(batch);
        Ok(())
    }
}

/// Simulates an unreachable transport.
pub struct FailingSink;

#[async_trait]
impl<T: Send + 'static> Sink<T> for FailingSink {
    async fn publish(&self, _batch: Vec<T>) -> Result<(), TransportError> {
        Err(TransportError::Unreachable("simulated outage".into()))
    }
}

/// Never completes a publish.
pub struct StalledSink;

#[async_trait]
impl<T: Send + 'static> Sink<T> for StalledSink {
    async fn publish(&self, _batch: Vec<T>) -> Result<(), TransportError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClosedSegment {
    pub segment: Segment,
    pub outcome: SegmentOutcome,
    pub elapsed: Duration,
}

/// Records segment events.
#[derive(Clone, Default)]
pub struct RecordingTraceBackend {
    opened: Arc<Mutex<Vec<Segment>>>,
    closed: Arc<Mutex<Vec<ClosedSegment>>>,
}

impl RecordingTraceBackend {
    pub fn opened(&self) -> Vec<Segment> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<ClosedSegment> {
        self.closed.lock().unwrap().clone()
    }
}

impl TraceBackend for RecordingTraceBackend {
    fn segment_opened(&self, segment: &Segment) -> Result<(), TransportError> {
        self.opened.lock().unwrap().push(segment.clone());
        Ok(())
    }

    fn segment_closed(
        &self,
        segment: &Segment,
        outcome: SegmentOutcome,
        elapsed: Duration,
    ) -> Result<(), TransportError> {
        self.closed.lock().unwrap().push(ClosedSegment {
            segment: segment.clone(),
            outcome,
            elapsed,
        });
        Ok(())
    }
}

pub struct FailingTraceBackend;

impl TraceBackend for FailingTraceBackend {
    fn segment_opened(&self, _segment: &Segment) -> Result<(), TransportError> {
        Err(TransportError::Unreachable("simulated outage".into()))
    }

    fn segment_closed(&self, _: &Segment, _: SegmentOutcome, _: Duration) -> Result<(), TransportError> {
        Err(TransportError::Unreachable("simulated outage".into()))
    }
}

/// Recording sinks for all three telemetry streams.
#[derive(Clone)]
pub struct Recorders {
    pub metrics: RecordingSink<MetricPoint>,
    pub logs: RecordingSink<LogRecord>,
    pub traces: RecordingTraceBackend,
}

impl Recorders {
    pub fn new() -> Self {
        Self {
            metrics: RecordingSink::new(),
            logs: RecordingSink::new(),
            traces: RecordingTraceBackend::default(),
        }
    }

    pub fn sinks(&self) -> TelemetrySinks {
        TelemetrySinks {
            metrics: Arc::new(self.metrics.clone()),
            logs: Arc::new(self.logs.clone()),
            traces: Arc::new(self.traces.clone()),
        }
    }

    /// Recorded points with the given metric name.
    pub fn points(&self, name: &str) -> Vec<MetricPoint> {
        self.metrics
            .items()
            .into_iter()
            .filter(|p| p.name() == name)
            .collect()
    }
}

pub fn failing_sinks() -> TelemetrySinks {
    TelemetrySinks {
        metrics: Arc::new(FailingSink),
        logs: Arc::new(FailingSink),
        traces: Arc::new(FailingTraceBackend),
    }
}

/// An instrumented router running in-process.
pub struct TestApp {
    pub app: Router,
    pub telemetry: Telemetry,
    workers: Option<TelemetryWorkers>,
}

impl TestApp {
    /// The service's own routes.
    pub fn start(config: &AppConfig, sinks: TelemetrySinks) -> Self {
        let (telemetry, workers) = Telemetry::start(config, sinks);
        let app = HttpServer::new(config, &telemetry).router();
        Self {
            app,
            telemetry,
            workers: Some(workers),
        }
    }

    /// Custom routes behind the same chain.
    pub fn with_routes(config: &AppConfig, sinks: TelemetrySinks, routes: Router) -> Self {
        let (telemetry, workers) = Telemetry::start(config, sinks);
        let app = instrumented(routes, InstrumentationChain::new(&telemetry));
        Self {
            app,
            telemetry,
            workers: Some(workers),
        }
    }

    pub async fn call(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Close the telemetry queues and wait for everything queued to be published.
    pub async fn flush(&mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown(Duration::from_secs(5)).await;
        }
    }
}
