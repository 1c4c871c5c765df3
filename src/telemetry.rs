//! Logging setup for step suites
//!
//! Steps log through `tracing`; these helpers install a subscriber. Filtering
//! follows `RUST_LOG` when it is set.
//!
//! # Example
//!
//! ```no_run
//! use kubestep::telemetry::init_logging;
//!
//! init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Install a stderr subscriber; later calls are no-ops
pub fn init_logging() {
    init_logging_with(DEFAULT_FILTER);
}

/// Like [`init_logging`] with a different fallback filter, e.g. `kubestep=debug`
pub fn init_logging_with(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter(default_filter))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

/// Subscriber writing through the test harness capture
///
/// Output only shows for failing tests (or with `--nocapture`).
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(filter("kubestep=debug"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}
