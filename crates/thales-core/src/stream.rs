//! Request and response message sequences.
//!
//! Streaming requests arrive through a bounded channel owned by the
//! transport. The handler pulls from the [`RequestStream`]; nothing is read
//! ahead of the consumer beyond the channel capacity, so a handler awaiting
//! per-item work keeps the source paused until it asks for the next item.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::cancel::CancelSignal;
use crate::error::{CallError, CallResult, TransportError};
use crate::status::Status;

/// A decoded RPC message.
pub type Message = serde_json::Value;

/// A lazy, single-pass response sequence for server-streaming calls.
pub type MessageStream = BoxStream<'static, CallResult<Message>>;

/// Readable side of a streaming request.
///
/// Yields `Err(CallError::Cancelled)` once and then ends if the call is
/// terminated while the consumer is waiting.
pub struct RequestStream {
    inner: BoxStream<'static, CallResult<Message>>,
}

impl RequestStream {
    /// Creates a bounded channel pair.
    ///
    /// The transport keeps the [`RequestSender`]; `send` suspends while the
    /// channel is full, which is how a slow consumer pauses the source.
    #[must_use]
    pub fn channel(capacity: usize) -> (RequestSender, RequestStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let inner = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        (RequestSender { tx }, RequestStream { inner })
    }

    /// Wraps an arbitrary stream.
    pub fn from_stream<S>(source: S) -> Self
    where
        S: Stream<Item = CallResult<Message>> + Send + 'static,
    {
        Self {
            inner: source.boxed(),
        }
    }

    /// Creates a finite stream from already-decoded messages.
    pub fn from_messages<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = Message>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(messages.into_iter().map(Ok)))
    }

    /// Ties the stream to a call's cancellation signal.
    #[must_use]
    pub fn bind_cancel(self, cancel: CancelSignal) -> Self {
        let inner = stream::unfold(Some((self.inner, cancel)), |state| async move {
            let (mut inner, cancel) = state?;
            if cancel.is_cancelled() {
                return Some((Err(CallError::Cancelled), None));
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => Some((Err(CallError::Cancelled), None)),
                item = inner.next() => item.map(|item| (item, Some((inner, cancel)))),
            }
        })
        .boxed();
        Self { inner }
    }

    /// Drains the remaining messages, stopping at the first error.
    pub async fn collect_messages(mut self) -> CallResult<Vec<Message>> {
        let mut messages = Vec::new();
        while let Some(item) = self.inner.next().await {
            messages.push(item?);
        }
        Ok(messages)
    }
}

impl Stream for RequestStream {
    type Item = CallResult<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for RequestStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestStream").finish_non_exhaustive()
    }
}

/// Writable side of a streaming request, held by the transport.
///
/// Dropping every sender ends the stream.
#[derive(Debug, Clone)]
pub struct RequestSender {
    tx: mpsc::Sender<CallResult<Message>>,
}

impl RequestSender {
    /// Delivers one decoded message, waiting for channel capacity.
    pub async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Delivers a decode or transport failure to the consumer.
    pub async fn fail(&self, status: Status) -> Result<(), TransportError> {
        self.tx
            .send(Err(CallError::Status(status)))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Returns `true` once the consumer has dropped the stream.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
