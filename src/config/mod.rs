//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → environment / CLI overrides
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → handed to the telemetry and HTTP subsystems at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable for the process lifetime; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Missing deployment identifiers are fatal: the process refuses to start

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError, ConfigOverrides};
pub use schema::{
    AppConfig, ListenerConfig, LogBackend, LogsConfig, MetricsBackend, MetricsConfig,
    QueueConfig, RoutesConfig, ShutdownConfig, SinkConfig, TraceConfig,
};
pub use validation::{validate_config, ValidationError};
