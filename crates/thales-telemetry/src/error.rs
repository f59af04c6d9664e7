//! Telemetry setup errors.

use thiserror::Error;

/// Failure installing the logging subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The level string is not a valid `EnvFilter` directive.
    #[error("invalid log filter `{filter}`: {reason}")]
    InvalidFilter {
        /// The rejected directive.
        filter: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}
