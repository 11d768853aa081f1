//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request-id layers)
//!     → middleware/instrumentation.rs (segment, timer, RequestCount)
//!     → routes.rs (handler; opaque to the chain)
//!     → instrumentation.rs (Latency + access log) or error.rs (ErrorCount + error log)
//!     → Send to client
//! ```

pub mod error;
pub mod middleware;
pub mod request;
pub mod routes;
pub mod server;

pub use error::{ErrorBody, ErrorCapture, HandlerError};
pub use middleware::InstrumentationChain;
pub use request::X_REQUEST_ID;
pub use server::{instrumented, HttpServer};
