//! HTTP request instrumentation library.
//!
//! Every request passes through an instrumentation chain that counts it, times it,
//! logs it, brackets it in a trace segment, and turns handler failures into a
//! uniform error response. Telemetry is handed to background workers so a slow or
//! broken sink never affects the client.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::{Telemetry, TelemetrySinks, TelemetryWorkers};
