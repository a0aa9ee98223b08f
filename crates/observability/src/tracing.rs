//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG`; when it is unset or invalid the given
//! default directive applies. Engines log with structured fields
//! (`firm`, `input_id`, `document`, `rule`), which the JSON formatter keeps
//! as separate keys.

use tracing_subscriber::EnvFilter;

/// JSON logs with the `info` default.
pub fn init() {
    init_with_default("info");
}

/// JSON logs + timestamps, filtered by `RUST_LOG` or `default_directive`.
pub fn init_with_default(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Human-readable output captured by the test harness (`debug` default).
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(false)
        .try_init();
}
