//! Where the workspace's `tracing` events go.
//!
//! Every Thales crate logs through `tracing` macros with `service`, `method`
//! and `request_id` fields. [`init_logging`] installs a `tracing-subscriber`
//! registry with an [`EnvFilter`] and one formatting layer, JSON or pretty.
//!
//! # Example
//!
//! ```rust,ignore
//! use thales_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//!
//! tracing::info!(service = "helloworld.Greeter", "listening");
//! ```

use thales_config::{LogFormat, LoggingConfig};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `false` skips installation entirely.
    pub enabled: bool,

    /// Level or directive list, e.g. `info` or `thales_server=debug,warn`.
    pub level: String,

    /// Output encoding.
    pub format: LogFormat,

    /// Emit an event when a span opens and closes.
    pub span_events: bool,

    /// Source file and line on every event.
    pub include_location: bool,

    /// Colors; only honored by the pretty format.
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::from(&LoggingConfig::default())
    }
}

impl LogConfig {
    /// Pretty, colored, debug-level output with span events.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            span_events: true,
            include_location: true,
            ansi: true,
        }
    }

    /// JSON at info level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            span_events: false,
            include_location: false,
            ansi: false,
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            enabled: config.enabled,
            level: config.level.clone(),
            format: config.format,
            span_events: false,
            include_location: config.include_location,
            ansi: config.ansi_enabled,
        }
    }
}

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// [`TelemetryError::InvalidFilter`] for a bad level string,
/// [`TelemetryError::AlreadyInitialized`] if another subscriber won.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(config.ansi)
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    tracing::debug!(level = %config.level, format = ?config.format, "logging initialized");
    Ok(())
}

/// Parses a level or directive list into an [`EnvFilter`].
///
/// # Errors
///
/// [`TelemetryError::InvalidFilter`] when the directive does not parse.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter).map_err(|e| TelemetryError::InvalidFilter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_follows_config_defaults() {
        let config = LogConfig::default();
        let logging = LoggingConfig::default();
        assert_eq!(config.enabled, logging.enabled);
        assert_eq!(config.level, logging.level);
        assert_eq!(config.format, logging.format);
    }

    #[test]
    fn test_presets() {
        let dev = LogConfig::development();
        assert_eq!(dev.format, LogFormat::Pretty);
        assert!(dev.span_events);
        assert!(dev.ansi);

        let prod = LogConfig::production();
        assert_eq!(prod.level, "info");
        assert_eq!(prod.format, LogFormat::Json);
        assert!(!prod.include_location);
    }

    #[test]
    fn test_from_logging_config() {
        let logging = LoggingConfig {
            enabled: true,
            level: "thales=debug".to_string(),
            format: LogFormat::Pretty,
            ansi_enabled: true,
            include_location: true,
        };
        let config = LogConfig::from(&logging);
        assert_eq!(config.level, "thales=debug");
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.ansi);
        assert!(config.include_location);
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("info").is_ok());
        assert!(create_env_filter("thales_server=debug,warn").is_ok());
        assert!(matches!(
            create_env_filter("thales=notalevel"),
            Err(TelemetryError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_disabled_logging_is_noop() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::production()
        };
        assert!(init_logging(&config).is_ok());
    }
}
