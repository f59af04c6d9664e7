//! Per-call shared state and the response writer.
//!
//! A [`CallHandle`] ties together the transport sink, the call's
//! [`MetadataState`], and its [`CancelSignal`]. The context, every
//! [`ResponseWriter`], and the call adapter all hold clones of the same
//! handle, so header flushes and writes are ordered no matter which of
//! them triggers the send.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::cancel::CancelSignal;
use crate::error::{CallError, CallResult};
use crate::metadata::{IntoMetadata, Metadata, MetadataState};
use crate::status::Status;
use crate::stream::Message;
use crate::transport::CallSink;

/// The four RPC call shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// Single request, single response.
    Unary,
    /// Streamed request, single response.
    RequestStream,
    /// Single request, streamed response.
    ResponseStream,
    /// Streamed request and response.
    Duplex,
}

impl CallType {
    /// Returns the shape name used in logs and metrics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::RequestStream => "request_stream",
            Self::ResponseStream => "response_stream",
            Self::Duplex => "duplex",
        }
    }

    /// Returns `true` if the request side is a stream.
    #[must_use]
    pub const fn streams_request(self) -> bool {
        matches!(self, Self::RequestStream | Self::Duplex)
    }

    /// Returns `true` if the response side is a stream.
    #[must_use]
    pub const fn streams_response(self) -> bool {
        matches!(self, Self::ResponseStream | Self::Duplex)
    }
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a streamed response came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A writer called `end` or `end_with`.
    Ended,
    /// Every writer was dropped without ending the stream.
    Abandoned,
    /// The call was cancelled first.
    Cancelled,
    /// A writer was dropped while its task was unwinding from a panic.
    Failed,
}

/// Clonable handle on one call's outgoing side.
#[derive(Clone)]
pub struct CallHandle {
    shared: Arc<Shared>,
}

struct Shared {
    sink: Arc<dyn CallSink>,
    metadata: Mutex<MetadataState>,
    // Serializes header flushes and message sends on the wire.
    outgoing: tokio::sync::Mutex<()>,
    cancel: CancelSignal,
    ended: AtomicBool,
    finished: AtomicBool,
    writer_panicked: AtomicBool,
    writers: AtomicUsize,
    end_notify: Notify,
}

impl CallHandle {
    /// Creates a handle over a transport sink.
    pub fn new(sink: Arc<dyn CallSink>, cancel: CancelSignal) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                metadata: Mutex::new(MetadataState::new()),
                outgoing: tokio::sync::Mutex::new(()),
                cancel,
                ended: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                writer_panicked: AtomicBool::new(false),
                writers: AtomicUsize::new(0),
                end_notify: Notify::new(),
            }),
        }
    }

    /// Returns the call's cancellation signal.
    #[must_use]
    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.shared.cancel
    }

    /// Returns `true` once the call was cancelled or terminated.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Stages a header field; ignored once the header is sent.
    pub fn set_header(&self, key: impl Into<String>, value: impl Into<String>) {
        self.shared.metadata.lock().set_header(key, value);
    }

    /// Upserts a trailer field.
    pub fn set_trailer(&self, key: impl Into<String>, value: impl Into<String>) {
        self.shared.metadata.lock().set_trailer(key, value);
    }

    /// Returns `true` once the header has been flushed.
    #[must_use]
    pub fn header_sent(&self) -> bool {
        self.shared.metadata.lock().header_sent()
    }

    /// Returns a snapshot of the staged header.
    #[must_use]
    pub fn pending_header(&self) -> Metadata {
        self.shared.metadata.lock().pending_header().clone()
    }

    /// Returns a snapshot of the accumulated trailer.
    #[must_use]
    pub fn trailer(&self) -> Metadata {
        self.shared.metadata.lock().trailer().clone()
    }

    /// Sends the header unless it was already sent.
    ///
    /// A well-formed override replaces the staged fields; a malformed one is
    /// ignored.
    pub async fn flush_header(&self, header_override: impl IntoMetadata) -> CallResult<()> {
        let _guard = self.shared.outgoing.lock().await;
        self.flush_locked(header_override).await
    }

    async fn flush_locked(&self, header_override: impl IntoMetadata) -> CallResult<()> {
        let header = self.shared.metadata.lock().flush(header_override);
        if let Some(header) = header {
            tracing::trace!(fields = header.len(), "sending header");
            self.shared.sink.send_header(header).await?;
        }
        Ok(())
    }

    /// Sends one response message, flushing the header first if needed.
    pub async fn send_message(&self, message: Message) -> CallResult<()> {
        if self.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        if self.is_ended() {
            return Err(CallError::StreamClosed);
        }

        let _guard = self.shared.outgoing.lock().await;
        // Either may have happened while this write was queued on the lock.
        if self.is_finished() {
            return Err(CallError::Cancelled);
        }
        if self.is_ended() {
            return Err(CallError::StreamClosed);
        }

        let cancel = self.shared.cancel.clone();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CallError::Cancelled),
            sent = async {
                self.flush_locked(None::<Metadata>).await?;
                self.shared.sink.send_message(message).await.map_err(CallError::from)
            } => sent,
        }
    }

    /// Returns a writer for the response stream.
    #[must_use]
    pub fn writer(&self) -> ResponseWriter {
        self.shared.writers.fetch_add(1, Ordering::SeqCst);
        ResponseWriter { call: self.clone() }
    }

    /// Returns the number of live writers.
    #[must_use]
    pub fn writer_count(&self) -> usize {
        self.shared.writers.load(Ordering::SeqCst)
    }

    /// Ends the response stream. Returns `false` if it was already ended.
    ///
    /// A well-formed end value replaces the accumulated trailer; a missing
    /// or malformed one leaves it as is.
    pub fn end(&self, end_value: impl IntoMetadata) -> bool {
        let mut metadata = self.shared.metadata.lock();
        if self.shared.ended.swap(true, Ordering::SeqCst) {
            return false;
        }
        metadata.finish_trailer(end_value);
        drop(metadata);
        self.shared.end_notify.notify_waiters();
        true
    }

    /// Returns `true` once the response stream was ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.shared.ended.load(Ordering::SeqCst)
    }

    /// Waits for the response stream to end, be abandoned, or be cancelled.
    pub async fn wait_end(&self) -> EndReason {
        loop {
            let notified = self.shared.end_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_ended() {
                return EndReason::Ended;
            }
            if self.is_cancelled() {
                return EndReason::Cancelled;
            }
            if self.shared.writer_panicked.load(Ordering::SeqCst) {
                return EndReason::Failed;
            }
            if self.writer_count() == 0 {
                return EndReason::Abandoned;
            }

            let cancel = self.shared.cancel.clone();
            tokio::select! {
                () = notified => {}
                () = cancel.cancelled() => {}
            }
        }
    }

    /// Terminates the call with `status`, flushing the header first.
    ///
    /// Only the first call has an effect. The call counts as cancelled from
    /// the moment this is entered: pending reads are released, a write parked
    /// in the sink gives up the outgoing lock, and further writes fail.
    pub async fn finish(&self, status: Status) -> CallResult<()> {
        if self.shared.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Must happen before taking the lock, or a stuck write holds it forever.
        self.shared.ended.store(true, Ordering::SeqCst);
        self.shared.cancel.cancel();
        self.shared.end_notify.notify_waiters();

        let _guard = self.shared.outgoing.lock().await;
        self.flush_locked(None::<Metadata>).await?;
        self.shared.sink.finish(status).await.map_err(CallError::from)
    }

    /// Returns `true` once [`finish`](Self::finish) ran.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("cancelled", &self.is_cancelled())
            .field("ended", &self.is_ended())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// Writable side of a streamed response.
///
/// Cloneable and movable into spawned tasks. The adapter terminates the
/// call once a writer ends the stream; if every writer is dropped without
/// ending it, the stream is treated as ended with no end value. A writer
/// dropped while its task panics fails the call with `INTERNAL` instead.
///
/// # Example
///
/// ```rust,ignore
/// let writer = ctx.writer().expect("streaming response");
/// tokio::spawn(async move {
///     writer.write(json!({ "n": 1 })).await?;
///     writer.end_with(json!({ "done": "yes" }));
///     Ok::<_, CallError>(())
/// });
/// ```
pub struct ResponseWriter {
    call: CallHandle,
}

impl ResponseWriter {
    /// Writes one message, suspending while the transport applies
    /// backpressure.
    pub async fn write(&self, message: Message) -> CallResult<()> {
        self.call.send_message(message).await
    }

    /// Serializes and writes a typed message.
    pub async fn write_as<T: Serialize>(&self, message: &T) -> CallResult<()> {
        let message = serde_json::to_value(message).map_err(|e| Status::internal(e.to_string()))?;
        self.write(message).await
    }

    /// Ends the stream, keeping the accumulated trailer.
    pub fn end(&self) -> bool {
        self.call.end(None::<Metadata>)
    }

    /// Ends the stream with an end-of-call value.
    pub fn end_with(&self, end_value: impl IntoMetadata) -> bool {
        self.call.end(end_value)
    }

    /// Upserts a trailer field.
    pub fn set_trailer(&self, key: impl Into<String>, value: impl Into<String>) {
        self.call.set_trailer(key, value);
    }

    /// Returns `true` once the stream was ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.call.is_ended()
    }

    /// Returns `true` once the call was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.call.is_cancelled()
    }
}

impl Clone for ResponseWriter {
    fn clone(&self) -> Self {
        self.call.writer()
    }
}

impl Drop for ResponseWriter {
    fn drop(&mut self) {
        let shared = &self.call.shared;
        let panicking = std::thread::panicking();
        if panicking {
            shared.writer_panicked.store(true, Ordering::SeqCst);
        }
        let prev = shared.writers.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 || panicking {
            shared.end_notify.notify_waiters();
        }
    }
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingSink;
    use serde_json::json;
    use std::time::Duration;

    fn handle() -> (CallHandle, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (CallHandle::new(sink.clone(), CancelSignal::new()), sink)
    }

    #[tokio::test]
    async fn test_first_message_flushes_header() {
        let (call, sink) = handle();
        call.set_header("a", "1");
        call.send_message(json!({"x": 1})).await.unwrap();
        call.set_header("b", "2");
        call.send_message(json!({"x": 2})).await.unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], format!("header {}", json!({"a": "1"})));
        assert!(events[1].starts_with("message"));
    }

    #[tokio::test]
    async fn test_finish_flushes_header_once() {
        let (call, sink) = handle();
        call.flush_header(json!({"h": "v"})).await.unwrap();
        call.finish(Status::ok()).await.unwrap();
        call.finish(Status::internal("again")).await.unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(events[1].starts_with("finish OK"));
        assert!(call.is_cancelled());
    }

    #[tokio::test]
    async fn test_end_with_replaces_trailer() {
        let (call, _sink) = handle();
        let writer = call.writer();
        writer.set_trailer("foo", "bar");
        assert!(writer.end_with(json!({"bar": "biz"})));
        assert!(!writer.end());
        assert_eq!(call.trailer(), Metadata::from([("bar", "biz")]));
    }

    #[tokio::test]
    async fn test_write_after_end_fails() {
        let (call, _sink) = handle();
        let writer = call.writer();
        writer.end();
        assert!(matches!(
            writer.write(json!(1)).await,
            Err(CallError::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_after_cancel_fails() {
        let (call, _sink) = handle();
        let writer = call.writer();
        call.cancel_signal().cancel();
        assert!(matches!(writer.write(json!(1)).await, Err(CallError::Cancelled)));
    }

    #[tokio::test]
    async fn test_wait_end_sees_explicit_end() {
        let (call, _sink) = handle();
        let writer = call.writer();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.end();
        });
        let reason = tokio::time::timeout(Duration::from_secs(1), call.wait_end())
            .await
            .unwrap();
        assert_eq!(reason, EndReason::Ended);
    }

    #[tokio::test]
    async fn test_wait_end_sees_abandoned_writers() {
        let (call, _sink) = handle();
        let writer = call.writer();
        let second = writer.clone();
        assert_eq!(call.writer_count(), 2);
        drop(writer);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(second);
        });
        let reason = tokio::time::timeout(Duration::from_secs(1), call.wait_end())
            .await
            .unwrap();
        assert_eq!(reason, EndReason::Abandoned);
    }

    #[tokio::test]
    async fn test_wait_end_sees_cancel() {
        let (call, _sink) = handle();
        let _writer = call.writer();
        let cancel = call.cancel_signal().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        let reason = tokio::time::timeout(Duration::from_secs(1), call.wait_end())
            .await
            .unwrap();
        assert_eq!(reason, EndReason::Cancelled);
    }

    /// Holds every message until the test opens the gate.
    struct GatedSink {
        gate: tokio::sync::Semaphore,
        entered: AtomicUsize,
        sent: Mutex<Vec<Message>>,
        status: Mutex<Option<Status>>,
    }

    impl GatedSink {
        fn closed() -> Self {
            Self {
                gate: tokio::sync::Semaphore::new(0),
                entered: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
                status: Mutex::new(None),
            }
        }
    }

    impl CallSink for GatedSink {
        fn send_header(
            &self,
            _header: Metadata,
        ) -> crate::BoxFuture<'_, Result<(), crate::TransportError>> {
            Box::pin(async { Ok(()) })
        }

        fn send_message(
            &self,
            message: Message,
        ) -> crate::BoxFuture<'_, Result<(), crate::TransportError>> {
            Box::pin(async move {
                self.entered.fetch_add(1, Ordering::SeqCst);
                if let Ok(permit) = self.gate.acquire().await {
                    permit.forget();
                }
                self.sent.lock().push(message);
                Ok(())
            })
        }

        fn finish(&self, status: Status) -> crate::BoxFuture<'_, Result<(), crate::TransportError>> {
            *self.status.lock() = Some(status);
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_finish_releases_write_stuck_in_sink() {
        let sink = Arc::new(GatedSink::closed());
        let call = CallHandle::new(sink.clone(), CancelSignal::new());
        let writer = call.writer();
        let stuck = tokio::spawn(async move { writer.write(json!({"n": 1})).await });
        while sink.entered.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        tokio::time::timeout(Duration::from_millis(500), call.finish(Status::internal("boom")))
            .await
            .expect("finish must not wait on the stuck write")
            .unwrap();

        assert!(matches!(stuck.await.unwrap(), Err(CallError::Cancelled)));
        let status = sink.status.lock().clone().unwrap();
        assert_eq!(status.code(), crate::Code::Internal);
        assert!(sink.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_write_queued_behind_end_is_rejected() {
        let sink = Arc::new(GatedSink::closed());
        let call = CallHandle::new(sink.clone(), CancelSignal::new());

        let first = call.writer();
        let first = tokio::spawn(async move { first.write(json!(1)).await });
        while sink.entered.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = call.writer();
        let second = tokio::spawn(async move { second.write(json!(2)).await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(call.end(None::<Metadata>));
        sink.gate.add_permits(2);

        assert!(first.await.unwrap().is_ok());
        assert!(matches!(second.await.unwrap(), Err(CallError::StreamClosed)));
        assert_eq!(*sink.sent.lock(), vec![json!(1)]);
    }

    #[tokio::test]
    async fn test_writer_dropped_by_panic_fails_stream() {
        let (call, _sink) = handle();
        let writer = call.writer();
        let task = tokio::spawn(async move {
            writer.write(json!(1)).await.unwrap();
            panic!("producer failed");
        });
        assert!(task.await.unwrap_err().is_panic());

        let reason = tokio::time::timeout(Duration::from_secs(1), call.wait_end())
            .await
            .unwrap();
        assert_eq!(reason, EndReason::Failed);
    }

    #[test]
    fn test_call_type_shapes() {
        assert!(!CallType::Unary.streams_request());
        assert!(CallType::RequestStream.streams_request());
        assert!(CallType::ResponseStream.streams_response());
        assert!(CallType::Duplex.streams_request() && CallType::Duplex.streams_response());
        assert_eq!(CallType::Duplex.to_string(), "duplex");
    }
}
