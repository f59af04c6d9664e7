//! Call cancellation.
//!
//! A [`CancelSignal`] is shared by everything that belongs to one call: the
//! transport trips it when the peer goes away or a deadline expires, the
//! adapter trips it once the call has been terminated. Every suspension
//! point of the call (`next`, request reads, response writes) observes it
//! and fails fast with [`CallError::Cancelled`](crate::CallError::Cancelled).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A clonable, idempotent cancellation flag with async notification.
///
/// # Example
///
/// ```
/// use thales_core::CancelSignal;
///
/// let signal = CancelSignal::new();
/// let clone = signal.clone();
///
/// clone.cancel();
/// assert!(signal.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    /// Creates a signal that has not been tripped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the signal and wakes every waiter. Calling it again is a no-op.
    pub fn cancel(&self) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns `true` once the signal has been tripped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes when the signal is tripped, immediately if it already was.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking the flag so a concurrent cancel()
            // cannot slip between the check and the await.
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
