//! Structured logging setup
//!
//! Builds `tracing` subscribers from [`LogConfig`]. The process-wide
//! subscriber is installed once at startup; the same builder produces the
//! per-call logger handed out by a logger hook.

use crate::config::{LogConfig, LogFormat};
use crate::error::RuntimeError;
use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Build a subscriber for `config`, honouring `RUST_LOG` when it is set.
#[must_use]
pub fn build_dispatch(config: &LogConfig) -> Dispatch {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json()),
        ),
        LogFormat::Text => Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer()),
        ),
    }
}

/// Install the process-wide subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), RuntimeError> {
    tracing::dispatcher::set_global_default(build_dispatch(config))
        .map_err(|e| RuntimeError::Internal(anyhow::anyhow!("logging already initialised: {e}")))
}
