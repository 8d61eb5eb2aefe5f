//! Process-wide tracing setup shared by kotoba binaries.

/// Subscriber configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogFormat, init, init_with};
