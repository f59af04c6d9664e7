//! Middleware composition.
//!
//! [`compose`] turns an ordered [`Chain`] into a [`ComposedChain`]: one
//! callable value implementing onion dispatch. Composition happens once at
//! startup; the composed value holds no per-call state and is shared by
//! every concurrent call routed to it.

use std::sync::Arc;

use thales_core::{CallResult, Context};
use thiserror::Error;

use crate::middleware::{BoxedMiddleware, IntoMiddleware, Middleware, Next};

/// Errors raised while composing a chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// The chain has no elements.
    #[error("cannot compose an empty middleware chain")]
    Empty,
}

/// An ordered list of chain elements, not yet composed.
///
/// Usually built with the [`chain!`](crate::chain) macro. A single
/// middleware or handler converts into a one-element chain.
#[derive(Clone, Default)]
pub struct Chain(Vec<BoxedMiddleware>);

impl Chain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chain from boxed elements.
    #[must_use]
    pub fn from_vec(elements: Vec<BoxedMiddleware>) -> Self {
        Self(elements)
    }

    /// Appends an element.
    #[must_use]
    pub fn then(mut self, middleware: impl IntoMiddleware) -> Self {
        self.0.push(middleware.into_middleware());
        self
    }

    /// Appends an element in place.
    pub fn push(&mut self, middleware: impl IntoMiddleware) {
        self.0.push(middleware.into_middleware());
    }

    /// Appends every element of `other`.
    pub fn extend(&mut self, other: Chain) {
        self.0.extend(other.0);
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the chain has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the element names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the boxed elements.
    #[must_use]
    pub fn into_vec(self) -> Vec<BoxedMiddleware> {
        self.0
    }
}

impl<M: Middleware> From<M> for Chain {
    fn from(middleware: M) -> Self {
        Self(vec![Arc::new(middleware)])
    }
}

impl From<BoxedMiddleware> for Chain {
    fn from(middleware: BoxedMiddleware) -> Self {
        Self(vec![middleware])
    }
}

impl From<Vec<BoxedMiddleware>> for Chain {
    fn from(elements: Vec<BoxedMiddleware>) -> Self {
        Self(elements)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Chain").field(&self.names()).finish()
    }
}

/// Builds a [`Chain`] from middleware and handlers, in order.
///
/// # Example
///
/// ```
/// use thales_middleware::{chain, from_fn, handler_fn};
///
/// let chain = chain![
///     from_fn(|ctx, next| Box::pin(async move { next.run(ctx).await })),
///     handler_fn(|_ctx| Box::pin(async { Ok(()) })),
/// ];
/// assert_eq!(chain.len(), 2);
/// ```
#[macro_export]
macro_rules! chain {
    () => {
        $crate::Chain::new()
    };
    ($($middleware:expr),+ $(,)?) => {
        $crate::Chain::from_vec(::std::vec![
            $($crate::IntoMiddleware::into_middleware($middleware)),+
        ])
    };
}

/// A composed chain, ready to dispatch calls.
///
/// Cheap to clone; clones share the same elements.
#[derive(Clone)]
pub struct ComposedChain {
    stack: Arc<[BoxedMiddleware]>,
}

impl ComposedChain {
    /// Runs the chain for one call.
    ///
    /// Resolves once element 0 settles. An element that does not call
    /// `next` short-circuits everything after it without error.
    pub async fn dispatch(&self, ctx: &mut Context) -> CallResult {
        Next::new(&self.stack).run(ctx).await
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Always `false`; composition rejects empty chains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Returns the element names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.stack.iter().map(|mw| mw.name()).collect()
    }
}

impl std::fmt::Debug for ComposedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedChain")
            .field("stack", &self.names())
            .finish()
    }
}

/// Composes `chain` into a single dispatchable value.
///
/// # Errors
///
/// Returns [`ComposeError::Empty`] if `chain` has no elements.
pub fn compose(chain: impl Into<Chain>) -> Result<ComposedChain, ComposeError> {
    let chain = chain.into();
    if chain.is_empty() {
        return Err(ComposeError::Empty);
    }
    tracing::trace!(stack = ?chain.names(), "composed middleware chain");
    Ok(ComposedChain {
        stack: chain.into_vec().into(),
    })
}
