//! Configuration validation.
//!
//! Serde handles syntax; this module checks that the deployment identifiers exist and
//! that every value is usable. All problems are reported at once so an operator can
//! fix a bad deployment in one pass.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{AppConfig, QueueConfig};

/// Largest batch a single publish may carry.
pub const MAX_BATCH_SIZE: usize = 1000;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a loaded configuration, returning every error found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);

    require(&mut errors, "metrics.namespace", &config.metrics.namespace);
    require(&mut errors, "logs.log_group", &config.logs.log_group);
    require(&mut errors, "logs.log_stream", &config.logs.log_stream);
    require(&mut errors, "tracing.service_name", &config.tracing.service_name);

    if !config.tracing.service_name.chars().all(is_service_name_char) {
        errors.push(ValidationError::new(
            "tracing.service_name",
            "may only contain letters, digits, whitespace and _ . : / % & # = + - @",
        ));
    }

    check_queue(&mut errors, "metrics.queue", config.metrics.queue);
    check_queue(&mut errors, "logs.queue", config.logs.queue);

    if config.metrics.backend == crate::config::MetricsBackend::Prometheus {
        check_address(
            &mut errors,
            "metrics.prometheus_address",
            &config.metrics.prometheus_address,
        );
    }

    if config.uses_collector() {
        require(&mut errors, "sink.region", &config.sink.region);
        match config.sink.endpoint.as_deref() {
            Some(endpoint) if endpoint.starts_with("http://") || endpoint.starts_with("https://") => {}
            Some(_) => errors.push(ValidationError::new(
                "sink.endpoint",
                "must be an http:// or https:// URL",
            )),
            None => errors.push(ValidationError::new(
                "sink.endpoint",
                "required when a collector backend is selected",
            )),
        }
        if config.sink.timeout_secs == 0 {
            errors.push(ValidationError::new("sink.timeout_secs", "must be greater than 0"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn require(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::new(field, "must be set"));
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a valid socket address", value),
        ));
    }
}

fn check_queue(errors: &mut Vec<ValidationError>, field: &'static str, queue: QueueConfig) {
    if queue.capacity == 0 {
        errors.push(ValidationError::new(field, "capacity must be greater than 0"));
    }
    if queue.batch_size == 0 || queue.batch_size > MAX_BATCH_SIZE {
        errors.push(ValidationError::new(
            field,
            format!("batch_size must be between 1 and {}", MAX_BATCH_SIZE),
        ));
    }
    if queue.batch_size > queue.capacity {
        errors.push(ValidationError::new(field, "batch_size must not exceed capacity"));
    }
}

fn is_service_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c.is_whitespace() || "_.:/%&#=+-@".contains(c)
}
