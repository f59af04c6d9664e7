//! One struct per configuration section.
//!
//! Every section fills missing keys from its `Default` impl and rejects keys
//! it does not know.

use serde::{Deserialize, Serialize};

/// `[app]`: identity carried into logs and `AppInfo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Application name, used in logs and metrics.
    pub name: String,

    /// Deployment environment (development, staging, production).
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "thales".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// `[server]`: listen address, drain timeout, request-stream buffer.
///
/// # Example
///
/// ```
/// use thales_config::ServerConfig;
///
/// let config = ServerConfig {
///     addr: "127.0.0.1:50051".to_string(),
///     shutdown_timeout_secs: 10,
///     stream_capacity: 8,
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address handed to the transport (e.g., "0.0.0.0:50051").
    pub addr: String,

    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_secs: u64,

    /// Number of request messages buffered ahead of a streaming handler.
    pub stream_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:50051".to_string(),
            shutdown_timeout_secs: 30,
            stream_capacity: 16,
        }
    }
}

/// Error reporting section.
///
/// `silent` suppresses the error diagnostic entirely. `verbose` renders the
/// error's backtrace, or its full cause chain, instead of its message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorsConfig {
    /// Suppress error diagnostics.
    pub silent: bool,

    /// Include backtraces or cause chains in diagnostics.
    pub verbose: bool,
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// `[logging]`: subscriber settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    pub enabled: bool,

    /// Log level or filter directive (e.g. "info", "thales=debug").
    pub level: String,

    /// Log output format.
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    pub ansi_enabled: bool,

    /// Include source file and line in logs.
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr, "0.0.0.0:50051");
        assert_eq!(config.shutdown_timeout_secs, 30);
        assert_eq!(config.stream_capacity, 16);
    }

    #[test]
    fn test_errors_default_loud_and_terse() {
        let config = ErrorsConfig::default();
        assert!(!config.silent);
        assert!(!config.verbose);
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str(r#""pretty""#).unwrap();
        assert_eq!(format, LogFormat::Pretty);
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), r#""json""#);
    }

    #[test]
    fn test_unknown_server_field_rejected() {
        let result: Result<ServerConfig, _> = serde_json::from_str(r#"{"http2": true}"#);
        assert!(result.is_err());
    }
}
