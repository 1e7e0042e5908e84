//! Logging and tracing initialisation.
//!
//! `log` records from this crate and its dependencies are bridged into
//! `tracing`, so both end up in the same formatted output.

use log::debug;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },
}

/// Builds the filter for a configured level such as `info` or
/// `caseflow=debug,reqwest=warn`.
pub fn build_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(level).map_err(|e| TelemetryError::InvalidFilter {
        filter: level.to_string(),
        message: e.to_string(),
    })
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
///
/// Returns `Ok(false)` if a global subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.level)?,
    };

    let (plain, json) = if config.json {
        (None, Some(fmt::layer().json().with_current_span(true)))
    } else {
        (Some(fmt::layer().with_target(true)), None)
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return Ok(false);
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        debug!("log records not bridged, a logger is already set: {}", e);
    }

    Ok(true)
}
