//! Logging setup shared by the tcxsync binaries.
//!
//! Per-workout context is carried by spans (`workout_id`) rather than by
//! logger handles passed through the pipeline.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging with a specific default level
///
/// # Arguments
/// * `default_level` - Default filter directive (debug, info, warn, error,
///   or a full `EnvFilter` string such as `tcx_core=debug`)
///
/// RUST_LOG still takes precedence when set. Targets are hidden; the span
/// fields already say which workout a line is about.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Initialize logging for testing (captures logs for test output)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
