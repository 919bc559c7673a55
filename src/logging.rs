//! Tracing setup for the workers embedding this crate.

use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::schema::Logging;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed installing the global subscriber: {0}")]
    Install(String),
}

// `RUST_LOG` takes precedence over the configured filter
fn build_filter(config: &Logging) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| LoggingError::InvalidFilter {
            filter: config.filter.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Install a global subscriber writing to stderr, as plain text or JSON lines,
/// and route `log` records through it.
pub fn init_logging(config: &Logging) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;

    let layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))?;

    // Fine if someone already bridged `log` for us
    let _ = LogTracer::init();
    Ok(())
}
