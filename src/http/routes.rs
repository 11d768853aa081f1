//! Demo routes served behind the instrumentation chain.

use std::time::Duration;

use axum::{extract::State, http::StatusCode};

use crate::http::error::HandlerError;

/// State shared by the demo routes.
#[derive(Debug, Clone)]
pub struct RouteState {
    pub long_running_delay: Duration,
}

/// `GET /`
pub async fn hello() -> &'static str {
    "Hello, World!"
}

/// `GET /error`
pub async fn deliberate_error() -> Result<&'static str, HandlerError> {
    Err(HandlerError::new("This is a deliberate error"))
}

/// `GET /long-running`: replies after the configured delay.
pub async fn long_running(State(state): State<RouteState>) -> String {
    tokio::time::sleep(state.long_running_delay).await;
    format!(
        "This request took {} to finish.",
        describe(state.long_running_delay)
    )
}

/// Fallback for unmatched paths.
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

fn describe(delay: Duration) -> String {
    let secs = delay.as_secs();
    match secs {
        60 => "1 minute".to_string(),
        s if s > 0 && s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{} seconds", s),
    }
}
