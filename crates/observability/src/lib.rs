//! Process-wide tracing setup shared by both service binaries.

pub mod logging;

pub use logging::LogFormat;

/// Initialize tracing for `service`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init(service: &'static str) {
    logging::init(service, LogFormat::from_env());
}
