//! Graceful shutdown coordination.
//!
//! [`ShutdownSignal`] stops the accept loop; [`CallTracker`] counts the
//! calls still in flight so `close` can wait for them to drain, and cancels
//! whatever is left once the shutdown timeout expires.
//!
//! # Example
//!
//! ```rust,ignore
//! use thales_server::shutdown::{CallTracker, ShutdownSignal};
//!
//! let shutdown = ShutdownSignal::new();
//! let tracker = CallTracker::new();
//!
//! tokio::select! {
//!     _ = shutdown.recv() => {}
//!     call = listener.accept() => {
//!         let token = tracker.track(call.cancel.clone());
//!         // ... serve, then drop(token)
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thales_core::CancelSignal;
use tokio::sync::Notify;

/// Trip-once signal that starts a server drain.
///
/// Clones share state; triggering any clone notifies all of them.
///
/// # Example
///
/// ```rust
/// use thales_server::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let clone = shutdown.clone();
///
/// shutdown.trigger();
/// assert!(clone.is_shutdown());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    signal: CancelSignal,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        self.signal.cancel();
    }

    /// Returns `true` if shutdown has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Completes when shutdown is triggered, immediately if it already was.
    pub async fn recv(&self) {
        self.signal.cancelled().await;
    }

    /// Creates a shutdown signal that trips on SIGTERM or SIGINT (Ctrl+C).
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            wait_for_os_signal().await;
            trigger.trigger();
        });

        signal
    }
}

/// Waits for SIGTERM or SIGINT on Unix, Ctrl+C elsewhere.
async fn wait_for_os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!(signal = "SIGTERM", "draining calls");
                    }
                    _ = sigint.recv() => {
                        tracing::info!(signal = "SIGINT", "draining calls");
                    }
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "failed to register signal handlers, falling back to Ctrl+C");
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "ctrl-c", "draining calls"),
        Err(e) => tracing::error!(error = %e, "failed to wait for Ctrl+C"),
    }
}

/// Tracks in-flight calls during shutdown.
///
/// Every accepted call holds a [`CallToken`]; dropping the token marks the
/// call as drained.
///
/// # Example
///
/// ```rust
/// use thales_core::CancelSignal;
/// use thales_server::CallTracker;
///
/// let tracker = CallTracker::new();
/// let token = tracker.track(CancelSignal::new());
/// assert_eq!(tracker.in_flight(), 1);
///
/// drop(token);
/// assert_eq!(tracker.in_flight(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicUsize,
    next_id: AtomicU64,
    calls: Mutex<HashMap<u64, CancelSignal>>,
    notify: Notify,
}

impl CallTracker {
    /// Creates a new tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call; hold the token until the call is finished.
    #[must_use]
    pub fn track(&self, cancel: CancelSignal) -> CallToken {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.calls.lock().insert(id, cancel);
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        CallToken {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns the number of calls in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Waits until every tracked call is finished.
    ///
    /// Completes immediately if there are none.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Waits up to `limit` for every tracked call to finish.
    ///
    /// Returns `false` if calls were still in flight when `limit` elapsed.
    pub async fn wait_idle_for(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait_idle()).await.is_ok()
    }

    /// Cancels every call still in flight. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let calls: Vec<CancelSignal> = self.inner.calls.lock().values().cloned().collect();
        for cancel in &calls {
            cancel.cancel();
        }
        calls.len()
    }
}

/// A token representing an in-flight call.
#[derive(Debug)]
pub struct CallToken {
    id: u64,
    inner: Arc<TrackerInner>,
}

impl Drop for CallToken {
    fn drop(&mut self) {
        self.inner.calls.lock().remove(&self.id);
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_trigger_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());
        signal.trigger();
        signal.trigger();
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_recv_completes_when_triggered() {
        let signal = ShutdownSignal::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .expect("recv should complete");
    }

    #[tokio::test]
    async fn test_shutdown_recv_immediate_if_triggered() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        tokio::time::timeout(Duration::from_millis(10), signal.recv())
            .await
            .expect("recv should complete immediately");
    }

    #[test]
    fn test_tracker_counts_tokens() {
        let tracker = CallTracker::new();
        let first = tracker.track(CancelSignal::new());
        let second = tracker.track(CancelSignal::new());
        assert_eq!(tracker.in_flight(), 2);

        drop(first);
        assert_eq!(tracker.in_flight(), 1);
        drop(second);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_immediate() {
        let tracker = CallTracker::new();
        tokio::time::timeout(Duration::from_millis(10), tracker.wait_idle())
            .await
            .expect("wait_idle should complete immediately");
    }

    #[tokio::test]
    async fn test_wait_idle_after_drop() {
        let tracker = CallTracker::new();
        let token = tracker.track(CancelSignal::new());

        let waiter = tracker.clone();
        let handle = tokio::spawn(async move { waiter.wait_idle().await });

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(token);
        });

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait should complete")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn test_wait_idle_for_reports_stuck_calls() {
        let tracker = CallTracker::new();
        let token = tracker.track(CancelSignal::new());

        assert!(!tracker.wait_idle_for(Duration::from_millis(20)).await);
        assert_eq!(tracker.in_flight(), 1);

        drop(token);
        assert!(tracker.wait_idle_for(Duration::from_millis(20)).await);
    }

    #[test]
    fn test_cancel_all_trips_live_calls_only() {
        let tracker = CallTracker::new();
        let live = CancelSignal::new();
        let done = CancelSignal::new();
        let _live_token = tracker.track(live.clone());
        drop(tracker.track(done.clone()));

        assert_eq!(tracker.cancel_all(), 1);
        assert!(live.is_cancelled());
        assert!(!done.is_cancelled());
    }
}
