//! Logging setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::ObservabilityConfig;

/// Install a global `tracing` subscriber based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Returns `false` if a
/// subscriber was already installed, in which case nothing changes.
#[must_use]
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.log_format == "json" {
        subscriber.with(fmt::layer().json()).try_init().is_ok()
    } else {
        subscriber.with(fmt::layer()).try_init().is_ok()
    }
}
