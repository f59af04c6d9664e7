//! Typed configuration system for Thales.
//!
//! This crate provides a strongly-typed configuration system for Thales
//! servers with support for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Example
//!
//! ```no_run
//! use thales_config::ConfigLoader;
//!
//! # fn main() -> Result<(), thales_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("thales.toml")?
//!     .with_env_prefix("THALES")
//!     .load()?;
//!
//! println!("listening on {}", config.server.addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [app]
//! name = "greeter"
//! environment = "production"
//!
//! [server]
//! addr = "0.0.0.0:50051"
//! shutdown_timeout_secs = 30
//! stream_capacity = 16
//!
//! [errors]
//! silent = false
//! verbose = false
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `THALES__SERVER__ADDR=0.0.0.0:9000`
//! - `THALES__ERRORS__SILENT=true`
//! - `THALES__LOGGING__FORMAT=pretty`

#![doc(html_root_url = "https://docs.rs/thales-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{ThalesConfig, ThalesConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{AppConfig, ErrorsConfig, LogFormat, LoggingConfig, ServerConfig};
