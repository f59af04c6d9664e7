//! Core middleware trait and types.
//!
//! This module defines the [`Middleware`] trait every chain element
//! implements, and [`Next`], the continuation handed to each element.
//!
//! An element may run code before calling `next`, suspend while the rest of
//! the chain runs, and run code after it settles. Not calling `next` at all
//! short-circuits the chain. A terminal element (a handler) never calls it.
//!
//! # Example
//!
//! ```
//! use thales_core::{CallResult, Context};
//! use thales_middleware::{BoxFuture, Middleware, Next};
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, CallResult> {
//!         Box::pin(async move {
//!             let result = next.run(ctx).await;
//!             tracing::debug!(elapsed = ?ctx.elapsed(), "downstream settled");
//!             result
//!         })
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thales_core::{BoxFuture, CallError, CallResult, Context, MiddlewareReentryError};

/// A shared, type-erased chain element.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// One element of a middleware chain.
///
/// # Invariants
///
/// - `next.run()` may be awaited at most once per invocation; a second call
///   fails with [`MiddlewareReentryError`]
/// - An error returned by `next.run()` may be handled or propagated
/// - Implementations hold no per-call state; it belongs in the [`Context`]
pub trait Middleware: Send + Sync + 'static {
    /// Returns a name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Processes the call, optionally continuing with `next`.
    fn process<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, CallResult>;
}

/// Continuation invoking the rest of the chain.
///
/// `run` takes `&self` so a buggy element calling it twice is caught at
/// runtime with a [`MiddlewareReentryError`] rather than hidden by the type
/// system.
pub struct Next<'a> {
    remaining: &'a [BoxedMiddleware],
    called: AtomicBool,
}

impl<'a> Next<'a> {
    /// Creates a continuation over the remaining elements.
    #[must_use]
    pub fn new(remaining: &'a [BoxedMiddleware]) -> Self {
        Self {
            remaining,
            called: AtomicBool::new(false),
        }
    }

    /// Returns the number of elements still to run.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// Invokes the next element, resolving once it and everything
    /// downstream has settled.
    ///
    /// Fails with [`CallError::Cancelled`] as soon as the call is
    /// terminated, without running further elements.
    pub async fn run(&self, ctx: &mut Context) -> CallResult {
        if self.called.swap(true, Ordering::SeqCst) {
            return Err(MiddlewareReentryError.into());
        }
        if ctx.is_cancelled() {
            return Err(CallError::Cancelled);
        }

        let Some((current, rest)) = self.remaining.split_first() else {
            return Ok(());
        };

        let cancel = ctx.cancel_signal().clone();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CallError::Cancelled),
            result = current.process(ctx, Next::new(rest)) => result,
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining.len())
            .field("called", &self.called.load(Ordering::SeqCst))
            .finish()
    }
}

/// A middleware built from a closure.
///
/// # Example
///
/// ```
/// use thales_middleware::from_fn;
///
/// let mw1 = from_fn(|ctx, next| {
///     Box::pin(async move {
///         ctx.set("value", "MW1");
///         next.run(ctx).await
///     })
/// });
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F> {
    /// Creates a named function middleware.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, CallResult> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, CallResult> {
        (self.func)(ctx, next)
    }
}

/// Creates a middleware from a closure taking `(ctx, next)`.
pub fn from_fn<F>(func: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, CallResult> + Send + Sync + 'static,
{
    FnMiddleware::new("fn", func)
}

/// A terminal element built from a closure. Never continues the chain.
pub struct HandlerFn<F> {
    name: &'static str,
    func: F,
}

impl<F> HandlerFn<F> {
    /// Creates a named handler.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Middleware for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, CallResult> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(&'a self, ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, CallResult> {
        (self.func)(ctx)
    }
}

/// Creates a handler from a closure taking `ctx`.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use thales_middleware::handler_fn;
///
/// let upper = handler_fn(|ctx| {
///     Box::pin(async move {
///         let message = ctx.request().and_then(|m| m["message"].as_str()).unwrap_or_default();
///         let reply = json!({ "message": message.to_uppercase() });
///         ctx.set_response(reply);
///         Ok(())
///     })
/// });
/// ```
pub fn handler_fn<F>(func: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, CallResult> + Send + Sync + 'static,
{
    HandlerFn::new("handler", func)
}

/// Conversion into a [`BoxedMiddleware`].
pub trait IntoMiddleware {
    /// Boxes `self` as a chain element.
    fn into_middleware(self) -> BoxedMiddleware;
}

impl<M: Middleware> IntoMiddleware for M {
    fn into_middleware(self) -> BoxedMiddleware {
        Arc::new(self)
    }
}

impl IntoMiddleware for BoxedMiddleware {
    fn into_middleware(self) -> BoxedMiddleware {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use parking_lot::Mutex;

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Record {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, CallResult> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:before", self.name));
                let result = next.run(ctx).await;
                self.log.lock().push(format!("{}:after", self.name));
                result
            })
        }
    }

    #[test]
    fn test_middleware_name() {
        let mw = Record {
            name: "first",
            log: Arc::default(),
        };
        assert_eq!(mw.name(), "first");
        let passthrough = from_fn(|ctx, next| Box::pin(async move { next.run(ctx).await }));
        assert_eq!(passthrough.name(), "fn");
    }

    #[tokio::test]
    async fn test_next_past_end_is_ok() {
        let (mut ctx, _) = context();
        let next = Next::new(&[]);
        assert_eq!(next.remaining(), 0);
        next.run(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_next_runs_elements_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack: Vec<BoxedMiddleware> = vec![
            Arc::new(Record { name: "a", log: log.clone() }),
            Arc::new(Record { name: "b", log: log.clone() }),
        ];

        let (mut ctx, _) = context();
        Next::new(&stack).run(&mut ctx).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["a:before", "b:before", "b:after", "a:after"]
        );
    }

    #[tokio::test]
    async fn test_second_run_is_reentry() {
        let (mut ctx, _) = context();
        let next = Next::new(&[]);
        next.run(&mut ctx).await.unwrap();
        let err = next.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, CallError::Reentry(_)));
    }

    #[tokio::test]
    async fn test_run_fails_fast_after_cancel() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack: Vec<BoxedMiddleware> = vec![Arc::new(Record { name: "a", log: log.clone() })];

        let (mut ctx, _) = context();
        ctx.cancel_signal().cancel();
        let err = Next::new(&stack).run(&mut ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(log.lock().is_empty());
    }
}
