//! Layered loading: preset, then file or string, then `PREFIX__SECTION__KEY`
//! environment overrides, then validation.

use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, LogFormat, ThalesConfig};

/// Builds a [`ThalesConfig`] from layers.
///
/// A file or string replaces the whole document; sections and keys it leaves
/// out fall back to their defaults, not to an earlier preset. Environment
/// overrides are applied last, at [`load`](Self::load).
///
/// # Example
///
/// ```no_run
/// use thales_config::ConfigLoader;
///
/// # fn main() -> Result<(), thales_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("thales.toml")?
///     .with_env_prefix("THALES")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: ThalesConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ThalesConfig::default(),
            env_prefix: None,
        }
    }

    /// Resets to `ThalesConfig::default()`.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = ThalesConfig::default();
        self
    }

    /// Start with the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = ThalesConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = ThalesConfig::production();
        self
    }

    /// Replaces the document with the contents of a `.toml` or `.json` file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file does not exist, cannot be read, or
    /// contains invalid TOML/JSON or unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format ("toml" or "json").
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unsupported.
    ///
    /// # Example
    ///
    /// ```
    /// use thales_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [server]
    ///     addr = "127.0.0.1:50051"
    ///
    ///     [errors]
    ///     silent = true
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.addr, "127.0.0.1:50051");
    /// assert!(config.errors.silent);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        Ok(self)
    }

    /// Set the environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, e.g.
    /// `THALES__SERVER__ADDR=0.0.0.0:9000` or `THALES__ERRORS__SILENT=true`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if present.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        self
    }

    /// Apply environment overrides, validate, and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an environment variable cannot be parsed or
    /// validation fails.
    pub fn load(mut self) -> Result<ThalesConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: Vec<(String, String)> = env::vars()
                .filter(|(key, _)| key.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Return the configuration without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> ThalesConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<ThalesConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };
        let parts: Vec<&str> = rest.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["APP", "NAME"] => config.app.name = value.to_string(),
            ["APP", "ENVIRONMENT"] => config.app.environment = value.to_string(),

            ["SERVER", "ADDR"] => config.server.addr = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = value
                    .parse()
                    .map_err(|_| ConfigError::env(key, value, "an integer"))?;
            }
            ["SERVER", "STREAM_CAPACITY"] => {
                config.server.stream_capacity = value
                    .parse()
                    .map_err(|_| ConfigError::env(key, value, "an integer"))?;
            }

            ["ERRORS", "SILENT"] => config.errors.silent = parse_bool_var(key, value)?,
            ["ERRORS", "VERBOSE"] => config.errors.verbose = parse_bool_var(key, value)?,

            ["LOGGING", "ENABLED"] => config.logging.enabled = parse_bool_var(key, value)?,
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env(key, value, "`json` or `pretty`"))
                    }
                };
            }
            ["LOGGING", "ANSI_ENABLED"] => {
                config.logging.ansi_enabled = parse_bool_var(key, value)?;
            }
            ["LOGGING", "INCLUDE_LOCATION"] => {
                config.logging.include_location = parse_bool_var(key, value)?;
            }

            _ => {}
        }

        Ok(())
    }
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env(key, value, "a boolean"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
