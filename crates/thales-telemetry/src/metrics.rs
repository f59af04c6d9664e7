//! Call metrics for Thales.
//!
//! Metrics are recorded through the `metrics` facade; installing a recorder
//! (Prometheus, statsd, ...) is left to the embedding application. Without a
//! recorder every call here is a no-op.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `thales_calls_total` | Counter | `service`, `method`, `code` | Completed calls |
//! | `thales_call_duration_seconds` | Histogram | `service`, `method` | Call latency |
//! | `thales_calls_in_flight` | Gauge | - | Calls currently dispatched |
//! | `thales_call_errors_total` | Counter | `service`, `method`, `code` | Errors seen by the error hook |
//!
//! # Example
//!
//! ```rust,ignore
//! use thales_telemetry::metrics::{describe_metrics, CallMetricsMiddleware, MetricsErrorHook};
//!
//! describe_metrics();
//! registry.use_global(CallMetricsMiddleware::new());
//! app.error_hook(MetricsErrorHook);
//! ```

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use thales_core::{BoxFuture, CallError, CallResult, Code, Context, ErrorHook};
use thales_middleware::{Middleware, Next};

/// Completed calls counter.
pub const CALLS_TOTAL: &str = "thales_calls_total";

/// Call latency histogram.
pub const CALL_DURATION_SECONDS: &str = "thales_call_duration_seconds";

/// In-flight calls gauge.
pub const CALLS_IN_FLIGHT: &str = "thales_calls_in_flight";

/// Errors reported through the error hook.
pub const CALL_ERRORS_TOTAL: &str = "thales_call_errors_total";

/// Registers descriptions for all standard metrics.
///
/// Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(CALLS_TOTAL, "Total number of RPC calls dispatched");
    describe_histogram!(CALL_DURATION_SECONDS, "RPC call duration in seconds");
    describe_gauge!(CALLS_IN_FLIGHT, "Number of RPC calls currently being processed");
    describe_counter!(CALL_ERRORS_TOTAL, "Total number of failed RPC calls by status code");
}

/// Records a completed call.
///
/// Updates:
/// - `thales_calls_total` (incremented)
/// - `thales_call_duration_seconds` (histogram observation)
pub fn record_call(service: &str, method: &str, code: Code, duration: Duration) {
    counter!(
        CALLS_TOTAL,
        "service" => service.to_string(),
        "method" => method.to_string(),
        "code" => code.name(),
    )
    .increment(1);

    histogram!(
        CALL_DURATION_SECONDS,
        "service" => service.to_string(),
        "method" => method.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Records a failed call.
pub fn record_call_error(service: &str, method: &str, code: Code) {
    counter!(
        CALL_ERRORS_TOTAL,
        "service" => service.to_string(),
        "method" => method.to_string(),
        "code" => code.name(),
    )
    .increment(1);
}

/// Increments the in-flight calls gauge.
pub fn increment_in_flight() {
    gauge!(CALLS_IN_FLIGHT).increment(1.0);
}

/// Decrements the in-flight calls gauge.
pub fn decrement_in_flight() {
    gauge!(CALLS_IN_FLIGHT).decrement(1.0);
}

/// Guard that decrements the in-flight gauge when dropped.
///
/// Keeps the gauge accurate when a call future is dropped mid-flight.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the gauge and returns the guard.
    #[must_use]
    pub fn new() -> Self {
        increment_in_flight();
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        decrement_in_flight();
    }
}

/// Middleware recording call count, latency, and in-flight calls.
///
/// Register it first with `use_global` so it wraps everything else. The
/// recorded code is the one the chain settled with; an error mapped later by
/// the error pipeline keeps the same code.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallMetricsMiddleware;

impl CallMetricsMiddleware {
    /// Creates the middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for CallMetricsMiddleware {
    fn name(&self) -> &'static str {
        "call_metrics"
    }

    fn process<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let _guard = InFlightGuard::new();
            let result = next.run(ctx).await;
            let code = match &result {
                Ok(()) => Code::Ok,
                Err(err) => err.code(),
            };
            record_call(ctx.service(), ctx.method(), code, ctx.elapsed());
            result
        })
    }
}

/// Error hook counting failures by status code.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsErrorHook;

impl ErrorHook for MetricsErrorHook {
    fn on_error(&self, error: &CallError, ctx: &Context) {
        record_call_error(ctx.service(), ctx.method(), error.code());
    }
}
