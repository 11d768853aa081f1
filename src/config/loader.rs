//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{AppConfig, LogBackend, MetricsBackend};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values supplied through the environment or command line.
///
/// Each set field replaces the corresponding file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub namespace: Option<String>,
    pub metrics_backend: Option<MetricsBackend>,
    pub metrics_address: Option<String>,
    pub log_group: Option<String>,
    pub log_stream: Option<String>,
    pub log_backend: Option<LogBackend>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
    pub service_name: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl ConfigOverrides {
    /// Apply the overrides on top of a parsed configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut config.listener.bind_address, &self.bind_address);
        set(&mut config.metrics.namespace, &self.namespace);
        set(&mut config.metrics.backend, &self.metrics_backend);
        set(&mut config.metrics.prometheus_address, &self.metrics_address);
        set(&mut config.logs.log_group, &self.log_group);
        set(&mut config.logs.log_stream, &self.log_stream);
        set(&mut config.logs.backend, &self.log_backend);
        set(&mut config.logs.level, &self.log_level);
        set(&mut config.logs.json, &self.log_json);
        set(&mut config.tracing.service_name, &self.service_name);
        set(&mut config.sink.region, &self.region);
        if self.endpoint.is_some() {
            config.sink.endpoint = self.endpoint.clone();
        }
        if self.api_key.is_some() {
            config.sink.api_key = self.api_key.clone();
        }
    }
}

/// Parse a TOML document into a configuration without validating it.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load the optional config file, apply overrides, and validate the result.
pub fn load_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => AppConfig::default(),
    };

    overrides.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
