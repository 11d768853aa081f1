//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Init logging → Start telemetry workers → Bind listener
//!
//! Shutdown:
//!     Signal received → Stop accepting → Drain requests (grace deadline)
//!     → Close telemetry queues → Flush workers (drain deadline) → Exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Requests still running at the grace deadline are abandoned; their trace
//!   segments close as `Abandoned` when the request futures are dropped

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
