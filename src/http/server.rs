//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum Router with the demo routes and 404 fallback
//! - Wrap every route in the instrumentation chain
//! - Assign and echo request IDs
//! - Serve with graceful shutdown

use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::AppConfig;
use crate::http::middleware::{instrument, InstrumentationChain};
use crate::http::routes::{self, RouteState};
use crate::observability::Telemetry;

/// HTTP server for the instrumented service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server publishing to the given telemetry clients.
    pub fn new(config: &AppConfig, telemetry: &Telemetry) -> Self {
        let chain = InstrumentationChain::new(telemetry);
        Self {
            router: Self::build_router(config, chain),
        }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(config: &AppConfig, chain: InstrumentationChain) -> Router {
        let state = RouteState {
            long_running_delay: Duration::from_secs(config.routes.long_running_delay_secs),
        };

        let routes = Router::new()
            .route("/", get(routes::hello))
            .route("/error", get(routes::deliberate_error))
            .route("/long-running", get(routes::long_running))
            .fallback(routes::not_found)
            .with_state(state);

        instrumented(routes, chain)
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received; draining requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Put `router` behind the instrumentation chain.
///
/// The request-id layers sit outermost so the chain sees the ID and the response
/// echoes it, including on failure responses.
pub fn instrumented(router: Router, chain: InstrumentationChain) -> Router {
    router
        .layer(middleware::from_fn_with_state(chain, instrument))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
