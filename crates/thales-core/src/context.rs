//! Per-call context.
//!
//! The [`Context`] is the one value threaded through a call's middleware
//! chain. It normalizes the four call shapes: the request side is either a
//! single message or a [`RequestStream`], the response side is either a
//! single message assigned by the handler, a [`MessageStream`], or pushes
//! through a [`ResponseWriter`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::app::AppInfo;
use crate::call::{CallHandle, CallType, ResponseWriter};
use crate::cancel::CancelSignal;
use crate::error::{CallError, CallResult};
use crate::metadata::{IntoMetadata, Metadata};
use crate::status::Status;
use crate::stream::{Message, MessageStream, RequestStream};
use crate::transport::IncomingRequest;

/// A unique identifier for each call, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines for one process roughly
/// sorted by call start.
///
/// # Example
///
/// ```
/// use thales_core::RequestId;
///
/// let id = RequestId::new();
/// println!("call id: {id}");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new time-ordered ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// The request side of a call.
#[derive(Debug)]
pub enum Request {
    /// A single decoded message.
    Message(Message),
    /// An incoming message stream.
    Stream(RequestStream),
    /// The stream was moved out with [`Context::take_request_stream`].
    Taken,
}

/// The response side of a call as left by the chain.
#[derive(Default)]
pub enum Response {
    /// Nothing assigned.
    #[default]
    Empty,
    /// A single message.
    Message(Message),
    /// A lazy sequence to forward item by item.
    Stream(MessageStream),
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// State for one in-flight call.
///
/// # Example
///
/// ```rust,ignore
/// async fn upper(ctx: &mut Context) -> CallResult {
///     let message = ctx.request().and_then(|m| m["message"].as_str()).map(str::to_uppercase);
///     let value = ctx.get("value").cloned().unwrap_or(Value::Null);
///     ctx.set_response(json!({ "message": message, "value": value }));
///     Ok(())
/// }
/// ```
pub struct Context {
    request_id: RequestId,
    call_type: CallType,
    service: String,
    method: String,
    metadata: Metadata,
    request: Request,
    response: Response,
    call: CallHandle,
    app: Arc<AppInfo>,
    locals: HashMap<String, Value>,
    extensions: HashMap<TypeId, Box<dyn Any + Send>>,
    peer: Option<SocketAddr>,
    started_at: Instant,
}

impl Context {
    /// Creates a context for a call routed to `service`/`method`.
    ///
    /// The request defaults to an empty message; use
    /// [`with_request`](Self::with_request) to attach the real payload.
    pub fn new(
        call_type: CallType,
        service: impl Into<String>,
        method: impl Into<String>,
        call: CallHandle,
    ) -> Self {
        Self {
            request_id: RequestId::new(),
            call_type,
            service: service.into(),
            method: method.into(),
            metadata: Metadata::new(),
            request: Request::Message(Value::Object(serde_json::Map::new())),
            response: Response::Empty,
            call,
            app: Arc::new(AppInfo::default()),
            locals: HashMap::new(),
            extensions: HashMap::new(),
            peer: None,
            started_at: Instant::now(),
        }
    }

    /// Sets the metadata received with the call.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attaches the request payload. Streams are tied to the call's
    /// cancellation so a terminated call releases a waiting reader.
    #[must_use]
    pub fn with_request(mut self, request: IncomingRequest) -> Self {
        self.request = match request {
            IncomingRequest::Message(message) => Request::Message(message),
            IncomingRequest::Stream(stream) => {
                Request::Stream(stream.bind_cancel(self.call.cancel_signal().clone()))
            }
        };
        self
    }

    /// Sets the shared application info.
    #[must_use]
    pub fn with_app(mut self, app: Arc<AppInfo>) -> Self {
        self.app = app;
        self
    }

    /// Sets the peer address.
    #[must_use]
    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    /// Returns the call ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the call shape.
    #[must_use]
    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Returns the resolved service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the resolved method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the metadata received with the call.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the remote address, if the transport reported one.
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns the shared application info.
    #[must_use]
    pub fn app(&self) -> &Arc<AppInfo> {
        &self.app
    }

    /// Returns when the call started.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the time since the call started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    // --- request ---

    /// Returns the request message for unary and server-stream calls.
    #[must_use]
    pub fn request(&self) -> Option<&Message> {
        match &self.request {
            Request::Message(message) => Some(message),
            _ => None,
        }
    }

    /// Deserializes the request message.
    pub fn request_as<T: DeserializeOwned>(&self) -> CallResult<T> {
        let message = self.request().ok_or(CallError::ShapeMismatch {
            expected: "single request message",
        })?;
        Ok(T::deserialize(message)?)
    }

    /// Returns the request stream for client-stream and duplex calls.
    pub fn request_stream(&mut self) -> CallResult<&mut RequestStream> {
        match &mut self.request {
            Request::Stream(stream) => Ok(stream),
            _ => Err(CallError::ShapeMismatch {
                expected: "request stream",
            }),
        }
    }

    /// Moves the request stream out, e.g. into a spawned task.
    pub fn take_request_stream(&mut self) -> CallResult<RequestStream> {
        match std::mem::replace(&mut self.request, Request::Taken) {
            Request::Stream(stream) => Ok(stream),
            other => {
                self.request = other;
                Err(CallError::ShapeMismatch {
                    expected: "request stream",
                })
            }
        }
    }

    // --- response ---

    /// Assigns the single response message.
    pub fn set_response(&mut self, message: Message) {
        self.response = Response::Message(message);
    }

    /// Serializes and assigns the single response message.
    pub fn set_response_as<T: Serialize>(&mut self, message: &T) -> CallResult<()> {
        let message =
            serde_json::to_value(message).map_err(|e| Status::internal(e.to_string()))?;
        self.set_response(message);
        Ok(())
    }

    /// Returns the assigned response message, if any.
    #[must_use]
    pub fn response(&self) -> Option<&Message> {
        match &self.response {
            Response::Message(message) => Some(message),
            _ => None,
        }
    }

    /// Returns the assigned response message for in-place edits.
    pub fn response_mut(&mut self) -> Option<&mut Message> {
        match &mut self.response {
            Response::Message(message) => Some(message),
            _ => None,
        }
    }

    /// Assigns a lazy response sequence for server-stream and duplex calls.
    pub fn set_response_stream(&mut self, stream: MessageStream) -> CallResult<()> {
        if !self.call_type.streams_response() {
            return Err(CallError::ShapeMismatch {
                expected: "single response message",
            });
        }
        self.response = Response::Stream(stream);
        Ok(())
    }

    /// Moves the response out, leaving [`Response::Empty`].
    pub fn take_response(&mut self) -> Response {
        std::mem::take(&mut self.response)
    }

    /// Returns a writer for server-stream and duplex calls.
    pub fn writer(&self) -> CallResult<ResponseWriter> {
        if !self.call_type.streams_response() {
            return Err(CallError::ShapeMismatch {
                expected: "response stream",
            });
        }
        Ok(self.call.writer())
    }

    // --- metadata ---

    /// Stages a header field. Ignored once the header is sent.
    pub fn set_header(&self, key: impl Into<String>, value: impl Into<String>) {
        self.call.set_header(key, value);
    }

    /// Sends the staged header now.
    ///
    /// The returned future owns a handle to the call, so it does not borrow
    /// the context.
    pub fn flush_header(&self) -> impl Future<Output = CallResult<()>> + Send + 'static {
        self.flush_header_with(None::<Metadata>)
    }

    /// Sends `header` in place of the staged fields.
    ///
    /// A malformed argument is ignored and the staged fields are sent.
    pub fn flush_header_with(
        &self,
        header: impl IntoMetadata,
    ) -> impl Future<Output = CallResult<()>> + Send + 'static {
        let call = self.call.clone();
        let header = header.into_metadata();
        async move { call.flush_header(header).await }
    }

    /// Returns `true` once the header was sent.
    #[must_use]
    pub fn header_sent(&self) -> bool {
        self.call.header_sent()
    }

    /// Upserts a trailer field.
    pub fn set_trailer(&self, key: impl Into<String>, value: impl Into<String>) {
        self.call.set_trailer(key, value);
    }

    /// Returns the trailer accumulated so far.
    #[must_use]
    pub fn trailer(&self) -> Metadata {
        self.call.trailer()
    }

    /// Returns the call's outgoing handle.
    #[must_use]
    pub fn call(&self) -> &CallHandle {
        &self.call
    }

    // --- cancellation ---

    /// Returns `true` once the call was cancelled or terminated.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.call.is_cancelled()
    }

    /// Returns the call's cancellation signal.
    #[must_use]
    pub fn cancel_signal(&self) -> &CancelSignal {
        self.call.cancel_signal()
    }

    /// Completes when the call is cancelled.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let cancel = self.call.cancel_signal().clone();
        async move { cancel.cancelled().await }
    }

    // --- locals ---

    /// Stores a local value, replacing any previous value under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.locals.insert(key.into(), value.into());
    }

    /// Returns a local value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }

    /// Removes a local value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.locals.remove(key)
    }

    /// Stores a typed extension value.
    pub fn set_extension<T: Send + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("call_type", &self.call_type)
            .field("service", &self.service)
            .field("method", &self.method)
            .field("metadata", &self.metadata)
            .field("response", &self.response)
            .field("locals", &self.locals)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingSink;
    use futures_util::StreamExt;
    use serde_json::json;

    fn context(call_type: CallType) -> (Context, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let call = CallHandle::new(sink.clone(), CancelSignal::new());
        (Context::new(call_type, "Greeter", "SayHello", call), sink)
    }

    #[test]
    fn test_locals_last_write_wins() {
        let (mut ctx, _) = context(CallType::Unary);
        ctx.set("value", "a");
        ctx.set("value", "MW1");
        assert_eq!(ctx.get("value"), Some(&json!("MW1")));
        assert_eq!(ctx.remove("value"), Some(json!("MW1")));
        assert!(ctx.get("value").is_none());
    }

    #[test]
    fn test_request_as() {
        #[derive(Deserialize)]
        struct Hello {
            message: String,
        }

        let (ctx, _) = context(CallType::Unary);
        let ctx = ctx.with_request(IncomingRequest::Message(json!({"message": "hi"})));
        let hello: Hello = ctx.request_as().unwrap();
        assert_eq!(hello.message, "hi");
    }

    #[test]
    fn test_request_as_rejects_bad_payload() {
        let (ctx, _) = context(CallType::Unary);
        let ctx = ctx.with_request(IncomingRequest::Message(json!("text")));
        let err = ctx.request_as::<HashMap<String, String>>().unwrap_err();
        assert_eq!(err.code(), crate::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_request_stream_shapes() {
        let (ctx, _) = context(CallType::RequestStream);
        let mut ctx = ctx.with_request(IncomingRequest::Stream(RequestStream::from_messages(
            vec![json!(1), json!(2)],
        )));
        assert!(ctx.request().is_none());
        assert_eq!(ctx.request_stream().unwrap().next().await.unwrap().unwrap(), json!(1));

        let rest = ctx.take_request_stream().unwrap();
        assert_eq!(rest.collect_messages().await.unwrap(), vec![json!(2)]);
        assert!(ctx.take_request_stream().is_err());
    }

    #[test]
    fn test_writer_only_for_streamed_responses() {
        let (ctx, _) = context(CallType::Unary);
        assert!(ctx.writer().is_err());
        let (ctx, _) = context(CallType::Duplex);
        assert!(ctx.writer().is_ok());
    }

    #[tokio::test]
    async fn test_header_flush_precedence() {
        let (ctx, sink) = context(CallType::Unary);
        ctx.set_header("c", "d");
        ctx.flush_header_with(json!({"a": "b"})).await.unwrap();
        ctx.set_header("e", "f");
        ctx.flush_header().await.unwrap();

        assert!(ctx.header_sent());
        assert_eq!(sink.events(), vec![r#"header {"a":"b"}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_header_override_ignored() {
        let (ctx, sink) = context(CallType::Unary);
        ctx.set_header("c", "d");
        ctx.flush_header_with(json!("not a mapping")).await.unwrap();
        assert_eq!(sink.events(), vec![r#"header {"c":"d"}"#.to_string()]);
    }

    #[test]
    fn test_extensions() {
        struct User(&'static str);

        let (mut ctx, _) = context(CallType::Unary);
        ctx.set_extension(User("alice"));
        assert_eq!(ctx.get_extension::<User>().map(|u| u.0), Some("alice"));
        assert_eq!(ctx.remove_extension::<User>().map(|u| u.0), Some("alice"));
        assert!(ctx.get_extension::<User>().is_none());
    }

    #[test]
    fn test_response_assignment() {
        let (mut ctx, _) = context(CallType::Unary);
        ctx.set_response(json!({"message": "HELLO"}));
        ctx.response_mut().unwrap()["value"] = json!("MW1");
        assert_eq!(ctx.response(), Some(&json!({"message": "HELLO", "value": "MW1"})));
        assert!(ctx.set_response_stream(futures_util::stream::empty().boxed()).is_err());
        assert!(matches!(ctx.take_response(), Response::Message(_)));
        assert!(ctx.response().is_none());
    }
}
