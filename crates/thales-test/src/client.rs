//! Test client for in-memory RPC calls.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use thales_core::{
    CancelSignal, Code, IncomingCall, IncomingRequest, Message, Metadata, RequestSender,
    RequestStream, Status,
};
use tokio::sync::mpsc;

use crate::error::TestError;
use crate::transport::{CallEvent, MemorySink, MemoryTransport};

/// A client issuing calls against a [`MemoryTransport`] listener.
///
/// # Example
///
/// ```rust,ignore
/// let client = transport.client(server.local_addr());
///
/// let outcome = client
///     .call("helloworld.Greeter", "SayHello")
///     .metadata("authorization", "Bearer token")
///     .unary(json!({ "message": "hello world" }))
///     .await?;
///
/// outcome.assert_ok();
/// assert_eq!(outcome.message().unwrap()["message"], "HELLO WORLD");
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct TestClient {
    transport: MemoryTransport,
    addr: String,
    default_metadata: Metadata,
}

impl TestClient {
    /// Creates a client for the listener on `addr`.
    pub fn new(transport: MemoryTransport, addr: impl Into<String>) -> Self {
        Self {
            transport,
            addr: addr.into(),
            default_metadata: Metadata::new(),
        }
    }

    /// Adds metadata sent with every call.
    pub fn with_default_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_metadata.insert(key, value);
        self
    }

    /// Returns the target address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Starts building a call.
    pub fn call(&self, service: impl Into<String>, method: impl Into<String>) -> CallBuilder<'_> {
        CallBuilder {
            client: self,
            service: service.into(),
            method: method.into(),
            metadata: self.default_metadata.clone(),
        }
    }

    /// Issues a unary call.
    pub async fn unary(
        &self,
        service: &str,
        method: &str,
        request: Message,
    ) -> Result<CallOutcome, TestError> {
        self.call(service, method).unary(request).await
    }

    /// Issues a client-streaming call.
    pub async fn client_stream(
        &self,
        service: &str,
        method: &str,
        requests: Vec<Message>,
    ) -> Result<CallOutcome, TestError> {
        self.call(service, method).client_stream(requests).await
    }

    /// Issues a server-streaming call and collects every response.
    pub async fn server_stream(
        &self,
        service: &str,
        method: &str,
        request: Message,
    ) -> Result<CallOutcome, TestError> {
        self.call(service, method).server_stream(request).await
    }

    /// Opens a bidirectional call.
    pub async fn duplex(&self, service: &str, method: &str) -> Result<StreamingCall, TestError> {
        self.call(service, method).duplex().await
    }
}

/// Builder for a single call.
#[derive(Debug)]
#[must_use]
pub struct CallBuilder<'a> {
    client: &'a TestClient,
    service: String,
    method: String,
    metadata: Metadata,
}

impl CallBuilder<'_> {
    /// Adds a metadata field to the call.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    /// Sends one request and waits for the single response.
    pub async fn unary(self, request: Message) -> Result<CallOutcome, TestError> {
        let call = self.open(IncomingRequest::Message(request), None).await?;
        call.finish().await
    }

    /// Streams `requests`, then waits for the single response.
    ///
    /// Requests are fed as the handler pulls them, so a slow handler
    /// throttles the client.
    pub async fn client_stream(self, requests: Vec<Message>) -> Result<CallOutcome, TestError> {
        let capacity = self.client.transport.capacity();
        let (sender, stream) = RequestStream::channel(capacity);
        let mut call = self.open(IncomingRequest::Stream(stream), None).await?;

        let feed = async move {
            for request in requests {
                if sender.send(request).await.is_err() {
                    break;
                }
            }
        };
        let (outcome, ()) = tokio::join!(call.collect(), feed);
        outcome
    }

    /// Sends one request and collects every streamed response.
    pub async fn server_stream(self, request: Message) -> Result<CallOutcome, TestError> {
        self.open_server_stream(request).await?.finish().await
    }

    /// Sends one request and returns the call for reading responses one by one.
    pub async fn open_server_stream(self, request: Message) -> Result<StreamingCall, TestError> {
        self.open(IncomingRequest::Message(request), None).await
    }

    /// Opens a bidirectional call.
    pub async fn duplex(self) -> Result<StreamingCall, TestError> {
        let capacity = self.client.transport.capacity();
        let (sender, stream) = RequestStream::channel(capacity);
        self.open(IncomingRequest::Stream(stream), Some(sender)).await
    }

    async fn open(
        self,
        request: IncomingRequest,
        sender: Option<RequestSender>,
    ) -> Result<StreamingCall, TestError> {
        let (tx, rx) = mpsc::channel(self.client.transport.capacity());
        let cancel = CancelSignal::new();
        let call = IncomingCall {
            service: self.service,
            method: self.method,
            metadata: self.metadata,
            request,
            sink: Arc::new(MemorySink::new(tx)),
            cancel: cancel.clone(),
            peer: None,
        };

        self.client.transport.dispatch(&self.client.addr, call).await?;

        Ok(StreamingCall {
            sender,
            events: rx,
            cancel,
            header: None,
            messages_seen: false,
            status: None,
        })
    }
}

/// A call in progress.
///
/// Dropping it before the status arrived cancels the call.
#[derive(Debug)]
pub struct StreamingCall {
    sender: Option<RequestSender>,
    events: mpsc::Receiver<CallEvent>,
    cancel: CancelSignal,
    header: Option<Metadata>,
    messages_seen: bool,
    status: Option<Status>,
}

impl StreamingCall {
    /// Sends one request message.
    pub async fn send(&self, message: Message) -> Result<(), TestError> {
        match &self.sender {
            Some(sender) => Ok(sender.send(message).await?),
            None => Err(TestError::Transport(thales_core::TransportError::Closed)),
        }
    }

    /// Closes the request side; the handler's stream ends after what was sent.
    pub fn close_send(&mut self) {
        self.sender = None;
    }

    /// Cancels the call from the client side.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the header, once received.
    #[must_use]
    pub fn header(&self) -> Option<&Metadata> {
        self.header.as_ref()
    }

    /// Returns the terminal status, once received.
    #[must_use]
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// Waits for the next response message.
    ///
    /// Returns `Ok(None)` once the terminal status arrived.
    pub async fn recv(&mut self) -> Result<Option<Message>, TestError> {
        if self.status.is_some() {
            return Ok(None);
        }
        loop {
            match self.events.recv().await {
                Some(CallEvent::Header(header)) => {
                    if self.header.is_some() || self.messages_seen {
                        return Err(TestError::Protocol("header sent twice or late".into()));
                    }
                    self.header = Some(header);
                }
                Some(CallEvent::Message(message)) => {
                    if self.header.is_none() {
                        return Err(TestError::Protocol("message before header".into()));
                    }
                    self.messages_seen = true;
                    return Ok(Some(message));
                }
                Some(CallEvent::Status(status)) => {
                    self.sender = None;
                    self.status = Some(status);
                    return Ok(None);
                }
                None => return Err(TestError::NoStatus),
            }
        }
    }

    /// Closes the request side and collects everything up to the status.
    pub async fn finish(mut self) -> Result<CallOutcome, TestError> {
        self.close_send();
        self.collect().await
    }

    async fn collect(&mut self) -> Result<CallOutcome, TestError> {
        let mut messages = Vec::new();
        while let Some(message) = self.recv().await? {
            messages.push(message);
        }
        let status = self.status.clone().ok_or(TestError::NoStatus)?;
        Ok(CallOutcome {
            header: self.header.clone(),
            messages,
            status,
        })
    }
}

impl Drop for StreamingCall {
    fn drop(&mut self) {
        if self.status.is_none() {
            self.cancel.cancel();
        }
    }
}

/// Everything a completed call delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    header: Option<Metadata>,
    messages: Vec<Message>,
    status: Status,
}

impl CallOutcome {
    /// Returns the response header.
    #[must_use]
    pub fn header(&self) -> Option<&Metadata> {
        self.header.as_ref()
    }

    /// Returns every response message, in order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the first response message.
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        self.messages.first()
    }

    /// Deserializes the first response message.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TestError> {
        let message = self.message().cloned().unwrap_or(Message::Null);
        Ok(serde_json::from_value(message)?)
    }

    /// Returns the terminal status.
    #[must_use]
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Returns the status code.
    #[must_use]
    pub fn code(&self) -> Code {
        self.status.code()
    }

    /// Returns the trailer delivered with the status.
    #[must_use]
    pub fn trailer(&self) -> &Metadata {
        self.status.metadata()
    }

    /// Returns `true` if the call succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Asserts the call succeeded.
    ///
    /// # Panics
    ///
    /// Panics with the status if it is not `OK`.
    pub fn assert_ok(&self) -> &Self {
        assert!(self.is_ok(), "expected OK, got {}", self.status);
        self
    }

    /// Asserts the status code.
    ///
    /// # Panics
    ///
    /// Panics if the code differs.
    pub fn assert_code(&self, expected: Code) -> &Self {
        assert_eq!(
            self.code(),
            expected,
            "unexpected status code (message: {:?})",
            self.status.message()
        );
        self
    }

    /// Asserts a trailer field.
    ///
    /// # Panics
    ///
    /// Panics if the field is missing or differs.
    pub fn assert_trailer(&self, key: &str, expected: &str) -> &Self {
        assert_eq!(self.trailer().get(key), Some(expected), "trailer {key}");
        self
    }
}
