//! Observability for the bridge
//!
//! Structured logging via the tracing crate. Connection lifecycle events,
//! reconnect attempts, and per-record failures are all emitted as tracing
//! events by the modules that own them; this module only configures output.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
