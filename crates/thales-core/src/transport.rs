//! Seams to the RPC transport.
//!
//! The transport owns sockets, framing, and serialization. It hands each
//! accepted call to the server as an [`IncomingCall`] and receives the
//! outgoing side through a [`CallSink`]. Anything that can do both (an
//! HTTP/2 stack, an in-memory harness) plugs in by implementing
//! [`Transport`] and [`Listener`].

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::call::CallType;
use crate::cancel::CancelSignal;
use crate::error::TransportError;
use crate::metadata::Metadata;
use crate::status::Status;
use crate::stream::{Message, RequestStream};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outgoing side of one call.
///
/// The server guarantees `send_header` is called at most once and before
/// any `send_message`, and that `finish` is called exactly once, last.
/// `send_message` may suspend to apply backpressure.
pub trait CallSink: Send + Sync + 'static {
    /// Delivers the header metadata.
    fn send_header(&self, header: Metadata) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Delivers one response message.
    fn send_message(&self, message: Message) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Delivers the terminal status with its trailer metadata.
    fn finish(&self, status: Status) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Request payload as delivered by the transport.
#[derive(Debug)]
pub enum IncomingRequest {
    /// A single decoded message.
    Message(Message),
    /// A stream of decoded messages.
    Stream(RequestStream),
}

/// A call accepted by a [`Listener`].
pub struct IncomingCall {
    /// Service name as sent by the caller.
    pub service: String,
    /// Method name as sent by the caller.
    pub method: String,
    /// Metadata received with the call.
    pub metadata: Metadata,
    /// The request payload.
    pub request: IncomingRequest,
    /// Outgoing side of the call.
    pub sink: Arc<dyn CallSink>,
    /// Tripped by the transport when the peer goes away.
    pub cancel: CancelSignal,
    /// Remote address, if known.
    pub peer: Option<SocketAddr>,
}

impl std::fmt::Debug for IncomingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingCall")
            .field("service", &self.service)
            .field("method", &self.method)
            .field("metadata", &self.metadata)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// A method the transport should accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Fully qualified service name.
    pub service: String,
    /// Method name.
    pub method: String,
    /// Call shape.
    pub call_type: CallType,
}

/// Listener credentials passed through to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Credentials {
    /// Plaintext.
    #[default]
    Insecure,
    /// TLS with PEM files.
    Tls {
        /// Certificate chain.
        cert_chain: PathBuf,
        /// Private key.
        private_key: PathBuf,
        /// CA bundle used to verify client certificates, if any.
        #[serde(default)]
        client_ca: Option<PathBuf>,
    },
}

/// Binds listeners for a set of methods.
pub trait Transport: Send + Sync + 'static {
    /// The listener type this transport produces.
    type Listener: Listener;

    /// Binds `addr` and starts accepting calls for `methods`.
    fn bind<'a>(
        &'a self,
        addr: &'a str,
        credentials: &'a Credentials,
        methods: &'a [MethodDescriptor],
    ) -> BoxFuture<'a, Result<Self::Listener, TransportError>>;
}

/// A bound listener.
pub trait Listener: Send + 'static {
    /// The bound address.
    fn local_addr(&self) -> String;

    /// Waits for the next call. `None` means the listener is closed.
    fn accept(&mut self) -> BoxFuture<'_, Option<IncomingCall>>;
}
