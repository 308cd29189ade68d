//! Logging setup for the `lakecat` binary.
//!
//! The library only emits `tracing` events. Binaries install a subscriber
//! once with [`init`].

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Filter from `RUST_LOG`, or from `default_filter` when it is unset.
pub fn filter(default_filter: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directives = format!("{},git2=warn", default_filter);
    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter {
        filter: default_filter.to_string(),
        reason: e.to_string(),
    })
}

/// Install a compact stderr subscriber.
pub fn init(default_filter: &str) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter)?)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}
