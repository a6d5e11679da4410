//! Logging initialization for binaries embedding the client.
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the process.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::error::ClientError;

/// Install the global subscriber described by `config`. `RUST_LOG`, when
/// set, takes precedence over the configured level.
pub fn init(config: &LoggingConfig) -> Result<(), ClientError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            ClientError::Config(format!("invalid log level '{}': {e}", config.level))
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format.as_str() {
        "pretty" => registry.with(fmt::layer()).try_init(),
        "compact" => registry.with(fmt::layer().compact()).try_init(),
        "json" => registry.with(fmt::layer().json()).try_init(),
        other => {
            return Err(ClientError::Config(format!(
                "unknown log format '{other}' (expected 'pretty', 'compact', or 'json')"
            )));
        }
    };

    installed.map_err(|e| ClientError::Config(format!("logging already initialized: {e}")))
}
