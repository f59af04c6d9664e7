//! # Thales Middleware
//!
//! Onion-style middleware composition for the Thales RPC framework.
//!
//! A call is handled by an ordered chain of elements sharing one signature,
//! `(ctx, next)`. Each element may act before continuing, continue by
//! awaiting `next.run(ctx)`, and act again after everything downstream has
//! settled:
//!
//! ```text
//!  mw1 ──▶ mw2 ──▶ mw3 ──▶ handler
//!   1       2       3         │
//!   6       5       4    ◀────┘
//! ```
//!
//! Pre-hooks run top to bottom, post-hooks bottom to top. An element that
//! never calls `next` short-circuits the rest of the chain. Calling `next`
//! twice fails with
//! [`MiddlewareReentryError`](thales_core::MiddlewareReentryError).
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use thales_middleware::{chain, compose, from_fn, handler_fn};
//!
//! let composed = compose(chain![
//!     from_fn(|ctx, next| Box::pin(async move {
//!         ctx.set("value", "MW1");
//!         next.run(ctx).await
//!     })),
//!     handler_fn(|ctx| Box::pin(async move {
//!         let value = ctx.get("value").cloned();
//!         ctx.set_response(json!({ "value": value }));
//!         Ok(())
//!     })),
//! ])
//! .expect("non-empty chain");
//!
//! assert_eq!(composed.len(), 2);
//! ```

#![doc(html_root_url = "https://docs.rs/thales-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod compose;
pub mod middleware;

pub use compose::{compose, Chain, ComposeError, ComposedChain};
pub use middleware::{
    from_fn, handler_fn, BoxedMiddleware, FnMiddleware, HandlerFn, IntoMiddleware, Middleware,
    Next,
};
pub use thales_core::BoxFuture;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use thales_core::{
        BoxFuture, CallHandle, CallSink, CallType, CancelSignal, Context, Message, Metadata,
        Status, TransportError,
    };

    /// Sink that discards everything.
    #[derive(Default)]
    pub(crate) struct NullSink;

    impl CallSink for NullSink {
        fn send_header(&self, _header: Metadata) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }

        fn send_message(&self, _message: Message) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }

        fn finish(&self, _status: Status) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }
    }

    pub(crate) fn context() -> (Context, CallHandle) {
        let call = CallHandle::new(Arc::new(NullSink), CancelSignal::new());
        (
            Context::new(CallType::Unary, "test.Service", "Method", call.clone()),
            call,
        )
    }
}
