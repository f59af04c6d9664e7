//! Errors raised while loading or validating configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Loading or validation failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `with_file` was given a path that does not exist.
    #[error("config file {} does not exist", path.display())]
    Missing {
        /// Requested path.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("cannot read config file {}", path.display())]
    Io {
        /// Requested path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Neither TOML nor JSON.
    #[error("unsupported config format `{0}`, expected toml or json")]
    UnsupportedFormat(String),

    /// Malformed TOML or an unknown key.
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed JSON or an unknown key.
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// An override variable whose value does not parse.
    #[error("{var}: expected {expected}, got `{value}`")]
    Env {
        /// Variable name including the prefix.
        var: String,
        /// Raw value.
        value: String,
        /// What the key accepts.
        expected: &'static str,
    },

    /// A value that parsed but is out of range.
    #[error("{field} {reason}")]
    Invalid {
        /// Dotted key, e.g. `server.stream_capacity`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn env(var: &str, value: &str, expected: &'static str) -> Self {
        Self::Env {
            var: var.to_string(),
            value: value.to_string(),
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_names_path() {
        let err = ConfigError::Missing {
            path: "/etc/thales/config.toml".into(),
        };
        assert_eq!(err.to_string(), "config file /etc/thales/config.toml does not exist");
    }

    #[test]
    fn test_invalid_message() {
        let err = ConfigError::invalid("server.stream_capacity", "must be at least 1");
        assert_eq!(err.to_string(), "server.stream_capacity must be at least 1");
    }

    #[test]
    fn test_env_message() {
        let err = ConfigError::env("THALES__ERRORS__SILENT", "loud", "a boolean");
        assert_eq!(
            err.to_string(),
            "THALES__ERRORS__SILENT: expected a boolean, got `loud`"
        );
    }
}
