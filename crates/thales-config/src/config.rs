//! Main configuration types.
//!
//! This module provides the top-level [`ThalesConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::{AppConfig, ConfigError, ErrorsConfig, LogFormat, LoggingConfig, ServerConfig};

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Complete Thales configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use thales_config::ThalesConfig;
///
/// let config = ThalesConfig::default();
/// assert_eq!(config.server.addr, "0.0.0.0:50051");
/// assert!(!config.errors.silent);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ThalesConfig {
    /// Application identity.
    #[serde(default)]
    pub app: AppConfig,

    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Error reporting configuration.
    #[serde(default)]
    pub errors: ErrorsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ThalesConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use thales_config::{ErrorsConfig, ThalesConfig};
    ///
    /// let config = ThalesConfig::builder()
    ///     .errors(ErrorsConfig { silent: true, verbose: false })
    ///     .build();
    ///
    /// assert!(config.errors.silent);
    /// ```
    #[must_use]
    pub fn builder() -> ThalesConfigBuilder {
        ThalesConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - The server address or application name is empty
    /// - The stream capacity is zero
    /// - The log level is not a level name or filter directive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.trim().is_empty() {
            return Err(ConfigError::invalid("app.name", "must not be empty"));
        }

        if self.server.addr.trim().is_empty() {
            return Err(ConfigError::invalid("server.addr", "must not be empty"));
        }

        if self.server.stream_capacity == 0 {
            return Err(ConfigError::invalid(
                "server.stream_capacity",
                "must be at least 1",
            ));
        }

        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) && !level.contains('=') {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("unknown log level: {}", self.logging.level),
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Pretty, colored, debug-level logs and verbose error diagnostics.
    ///
    /// # Example
    ///
    /// ```
    /// use thales_config::ThalesConfig;
    ///
    /// let config = ThalesConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// assert!(config.errors.verbose);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.app.environment = "development".to_string();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.ansi_enabled = true;
        config.logging.include_location = true;
        config.errors.verbose = true;

        config
    }

    /// Create a production configuration preset.
    ///
    /// JSON info-level logs and terse error diagnostics.
    ///
    /// # Example
    ///
    /// ```
    /// use thales_config::{LogFormat, ThalesConfig};
    ///
    /// let config = ThalesConfig::production();
    /// assert_eq!(config.logging.format, LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.app.environment = "production".to_string();
        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config.logging.ansi_enabled = false;
        config.errors.verbose = false;

        config
    }
}

/// Builder for [`ThalesConfig`].
#[derive(Debug, Default)]
pub struct ThalesConfigBuilder {
    config: ThalesConfig,
}

impl ThalesConfigBuilder {
    /// Create a builder starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application section.
    #[must_use]
    pub fn app(mut self, app: AppConfig) -> Self {
        self.config.app = app;
        self
    }

    /// Set the server section.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    /// Set the error reporting section.
    #[must_use]
    pub fn errors(mut self, errors: ErrorsConfig) -> Self {
        self.config.errors = errors;
        self
    }

    /// Set the logging section.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> ThalesConfig {
        self.config
    }
}
