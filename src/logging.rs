//! Logging setup
//!
//! Access log lines are emitted under the `access` target, so they can be
//! filtered separately, e.g. `RUST_LOG=info,access=off`.

use crate::config::LogConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target used for per-request access log lines
pub const ACCESS_TARGET: &str = "access";

/// Install the global fmt subscriber
///
/// `RUST_LOG` overrides `config.level`. Calling this again after a
/// subscriber is installed does nothing.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(config.ansi)
                .with_thread_names(true),
        )
        .try_init();
}
