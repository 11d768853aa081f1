//! HTTP middleware.

pub mod instrumentation;

pub use instrumentation::{instrument, InstrumentationChain, RequestContext, UNMATCHED_ROUTE};
