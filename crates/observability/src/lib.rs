//! Process-wide logging setup shared by the binaries.

/// Subscriber installation (filters, output format, destination).
pub mod tracing;

pub use self::tracing::{InitError, LogConfig, LogFormat, init};
