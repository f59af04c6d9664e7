//! Observability for Thales services.
//!
//! This crate wires the workspace's `tracing` events and call metrics to
//! their outputs:
//!
//! - **Logging**: a `tracing-subscriber` registry with an env filter and JSON
//!   or pretty output ([`logging`])
//! - **Metrics**: call counters, latency histograms and an in-flight gauge
//!   through the `metrics` facade ([`metrics`])
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `thales_calls_total` | Counter | `service`, `method`, `code` | Completed calls |
//! | `thales_call_duration_seconds` | Histogram | `service`, `method` | Call latency |
//! | `thales_calls_in_flight` | Gauge | - | Calls currently dispatched |
//! | `thales_call_errors_total` | Counter | `service`, `method`, `code` | Failed calls |
//!
//! # Example
//!
//! ```rust,ignore
//! use thales_config::ConfigLoader;
//! use thales_telemetry::{init_logging, LogConfig};
//!
//! let config = ConfigLoader::new().with_env_prefix("THALES").load()?;
//! init_logging(&LogConfig::from(&config.logging))?;
//! ```

#![doc(html_root_url = "https://docs.rs/thales-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{create_env_filter, init_logging, LogConfig};
pub use metrics::{
    describe_metrics, record_call, record_call_error, CallMetricsMiddleware, InFlightGuard,
    MetricsErrorHook,
};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
