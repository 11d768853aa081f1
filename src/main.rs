//! Instrumented HTTP service.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────────┐
//!                    │                  INSTRUMENTED SERVICE                    │
//!                    │                                                          │
//!  Client Request    │  ┌──────────┐   ┌──────────────────────┐   ┌──────────┐  │
//!  ──────────────────┼─▶│request-id│──▶│ instrumentation chain│──▶│  routes  │  │
//!                    │  │  layers  │   │ segment/timer/count  │   │ (opaque) │  │
//!                    │  └──────────┘   └──────────┬───────────┘   └──────────┘  │
//!  Client Response   │                            │                             │
//!  ◀─────────────────┼────────────── latency + log, or ErrorCapture             │
//!                    │                            │                             │
//!                    │            ┌───────────────┼────────────────┐            │
//!                    │            ▼               ▼                ▼            │
//!                    │     ┌────────────┐  ┌─────────────┐  ┌────────────┐      │
//!                    │     │  metrics   │  │ request log │  │   trace    │      │
//!                    │     │ queue+worker│ │ queue+worker│  │  backend   │      │
//!                    │     └─────┬──────┘  └──────┬──────┘  └─────┬──────┘      │
//!                    └───────────┼────────────────┼───────────────┼─────────────┘
//!                                ▼                ▼               ▼
//!                       Prometheus / collector   tracing / collector   trace log
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use request_telemetry::config::{load_config, ConfigOverrides, LogBackend, MetricsBackend};
use request_telemetry::lifecycle::{wait_for_signal, Shutdown};
use request_telemetry::observability::{logging, metrics};
use request_telemetry::{HttpServer, Telemetry, TelemetrySinks};

/// Command line and environment settings. Each one overrides the config file.
#[derive(Debug, Parser)]
#[command(name = "request-telemetry", version, about = "Instrumented HTTP service")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, short, env = "APP_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "BIND_ADDRESS")]
    bind_address: Option<String>,

    /// Metrics namespace.
    #[arg(long, env = "NAMESPACE")]
    namespace: Option<String>,

    #[arg(long, env = "METRICS_BACKEND", value_parser = parse_metrics_backend)]
    metrics_backend: Option<MetricsBackend>,

    #[arg(long, env = "METRICS_ADDRESS")]
    metrics_address: Option<String>,

    #[arg(long, env = "LOG_GROUP_NAME")]
    log_group: Option<String>,

    #[arg(long, env = "LOG_STREAM_NAME")]
    log_stream: Option<String>,

    #[arg(long, env = "LOG_BACKEND", value_parser = parse_log_backend)]
    log_backend: Option<LogBackend>,

    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[arg(long, env = "LOG_JSON")]
    log_json: Option<bool>,

    /// Trace service name.
    #[arg(long, env = "APP_NAME")]
    service_name: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Telemetry collector base URL.
    #[arg(long, env = "TELEMETRY_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, env = "TELEMETRY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind_address: self.bind_address.clone(),
            namespace: self.namespace.clone(),
            metrics_backend: self.metrics_backend,
            metrics_address: self.metrics_address.clone(),
            log_group: self.log_group.clone(),
            log_stream: self.log_stream.clone(),
            log_backend: self.log_backend,
            log_level: self.log_level.clone(),
            log_json: self.log_json,
            service_name: self.service_name.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

fn parse_metrics_backend(s: &str) -> Result<MetricsBackend, String> {
    match s.to_ascii_lowercase().as_str() {
        "prometheus" => Ok(MetricsBackend::Prometheus),
        "collector" => Ok(MetricsBackend::Collector),
        "log" => Ok(MetricsBackend::Log),
        other => Err(format!("unknown metrics backend '{}'", other)),
    }
}

fn parse_log_backend(s: &str) -> Result<LogBackend, String> {
    match s.to_ascii_lowercase().as_str() {
        "tracing" => Ok(LogBackend::Tracing),
        "collector" => Ok(LogBackend::Collector),
        other => Err(format!("unknown log backend '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Refuse to start without valid telemetry destinations.
    let config = match load_config(args.config.as_deref(), &args.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(2);
        }
    };

    logging::init_logging(&config.logs)?;
    tracing::info!("request-telemetry v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        namespace = %config.metrics.namespace,
        metrics_backend = ?config.metrics.backend,
        log_group = %config.logs.log_group,
        log_stream = %config.logs.log_stream,
        log_backend = ?config.logs.backend,
        service_name = %config.tracing.service_name,
        "Configuration loaded"
    );

    if config.metrics.backend == MetricsBackend::Prometheus {
        let addr: SocketAddr = config.metrics.prometheus_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let sinks = TelemetrySinks::from_config(&config)?;
    let (telemetry, workers) = Telemetry::start(&config, sinks);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let grace = Duration::from_secs(config.shutdown.grace_secs);
    let drain = Duration::from_secs(config.shutdown.drain_secs);

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config, &telemetry);
    drop(telemetry);
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        result = &mut server_task => {
            result??;
        }
        _ = wait_for_signal() => {
            shutdown.trigger();
            match tokio::time::timeout(grace, &mut server_task).await {
                Ok(result) => result??,
                Err(_) => {
                    tracing::warn!(
                        grace_secs = grace.as_secs(),
                        "In-flight requests still running at shutdown deadline; abandoning them"
                    );
                    server_task.abort();
                }
            }
        }
    }

    workers.shutdown(drain).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
