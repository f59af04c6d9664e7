//! Observable error hook.

use crate::context::Context;
use crate::error::CallError;

/// Receives every call-level failure exactly once.
///
/// The hook runs after the status delivered to the caller has been derived
/// and cannot alter it. It is injected into the error pipeline at startup.
///
/// Closures work directly:
///
/// ```
/// use thales_core::{CallError, Context, ErrorHook};
///
/// fn assert_hook<H: ErrorHook>(_: H) {}
/// assert_hook(|err: &CallError, ctx: &Context| {
///     eprintln!("{}/{} failed: {err}", ctx.service(), ctx.method());
/// });
/// ```
pub trait ErrorHook: Send + Sync + 'static {
    /// Called with the failure and the context of the failed call.
    fn on_error(&self, error: &CallError, ctx: &Context);
}

/// Hook that ignores every error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopErrorHook;

impl ErrorHook for NoopErrorHook {
    fn on_error(&self, _error: &CallError, _ctx: &Context) {}
}

impl<F> ErrorHook for F
where
    F: Fn(&CallError, &Context) + Send + Sync + 'static,
{
    fn on_error(&self, error: &CallError, ctx: &Context) {
        self(error, ctx);
    }
}
