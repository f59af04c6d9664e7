//! Server configuration types.
//!
//! Uses the builder pattern for ergonomic construction, or converts from the
//! `server` section of a loaded [`ThalesConfig`](thales_config::ThalesConfig).
//!
//! # Example
//!
//! ```rust
//! use thales_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .addr("127.0.0.1:50051")
//!     .shutdown_timeout(Duration::from_secs(5))
//!     .build();
//!
//! assert_eq!(config.addr(), "127.0.0.1:50051");
//! ```

use std::time::Duration;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "0.0.0.0:50051";

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default request-stream buffer, in messages.
pub const DEFAULT_STREAM_CAPACITY: usize = 16;

/// Server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address handed to the transport
    addr: String,

    /// How long `close` waits for in-flight calls before cancelling them
    shutdown_timeout: Duration,

    /// Request messages buffered ahead of a streaming handler
    stream_capacity: usize,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the listen address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Returns the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the request-stream buffer size.
    #[must_use]
    pub fn stream_capacity(&self) -> usize {
        self.stream_capacity
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&thales_config::ServerConfig> for ServerConfig {
    fn from(config: &thales_config::ServerConfig) -> Self {
        Self::builder()
            .addr(config.addr.clone())
            .shutdown_timeout(Duration::from_secs(config.shutdown_timeout_secs))
            .stream_capacity(config.stream_capacity)
            .build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    addr: String,
    shutdown_timeout: Duration,
    stream_capacity: usize,
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// Sets the listen address.
    #[must_use]
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Sets the graceful shutdown timeout.
    ///
    /// This is the maximum time `close` waits for in-flight calls before
    /// cancelling them.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the request-stream buffer size. Zero is raised to one.
    #[must_use]
    pub fn stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            addr: self.addr,
            shutdown_timeout: self.shutdown_timeout,
            stream_capacity: self.stream_capacity,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
