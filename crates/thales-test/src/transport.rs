//! In-memory transport.
//!
//! [`MemoryTransport`] implements the transport seam without any sockets:
//! listeners are entries in a shared table keyed by address, and every call
//! is a pair of bounded channels (request messages in, call events out).
//! Both directions apply backpressure the way a flow-controlled transport
//! would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thales_core::{
    BoxFuture, CallSink, Credentials, IncomingCall, Listener, Message, Metadata,
    MethodDescriptor, Status, Transport, TransportError,
};
use thales_server::DEFAULT_STREAM_CAPACITY;
use tokio::sync::mpsc;

use crate::client::TestClient;
use crate::error::TestError;

/// Something the server sent on a call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// The response header.
    Header(Metadata),
    /// One response message.
    Message(Message),
    /// The terminal status, carrying the trailer.
    Status(Status),
}

/// A socket-free transport for tests.
///
/// Clones share the same address table, so a server bound through one clone
/// is reachable from clients created through another.
///
/// # Example
///
/// ```rust,ignore
/// let transport = MemoryTransport::new();
/// let server = app.start(&transport, "memory:0", &Credentials::Insecure).await?;
///
/// let client = transport.client(server.local_addr());
/// let reply = client.unary("helloworld.Greeter", "SayHello", json!({})).await?;
/// ```
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    network: Arc<Network>,
}

#[derive(Debug)]
struct Network {
    listeners: Mutex<HashMap<String, Endpoint>>,
    next_port: AtomicU64,
    capacity: usize,
}

#[derive(Debug)]
struct Endpoint {
    calls: mpsc::Sender<IncomingCall>,
    methods: Vec<MethodDescriptor>,
}

impl MemoryTransport {
    /// Creates a transport with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STREAM_CAPACITY)
    }

    /// Creates a transport whose per-call channels hold `capacity` items.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            network: Arc::new(Network {
                listeners: Mutex::new(HashMap::new()),
                next_port: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Returns the per-call channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.network.capacity
    }

    /// Returns `true` if a listener is bound to `addr`.
    #[must_use]
    pub fn is_listening(&self, addr: &str) -> bool {
        self.network.listeners.lock().contains_key(addr)
    }

    /// Returns the methods the listener on `addr` was bound with.
    #[must_use]
    pub fn methods(&self, addr: &str) -> Option<Vec<MethodDescriptor>> {
        self.network
            .listeners
            .lock()
            .get(addr)
            .map(|endpoint| endpoint.methods.clone())
    }

    /// Creates a client for the listener on `addr`.
    #[must_use]
    pub fn client(&self, addr: impl Into<String>) -> TestClient {
        TestClient::new(self.clone(), addr)
    }

    pub(crate) async fn dispatch(&self, addr: &str, call: IncomingCall) -> Result<(), TestError> {
        let calls = self
            .network
            .listeners
            .lock()
            .get(addr)
            .map(|endpoint| endpoint.calls.clone())
            .ok_or_else(|| TestError::NotListening(addr.to_string()))?;

        calls.send(call).await.map_err(|_| TestError::Rejected)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    type Listener = MemoryListener;

    fn bind<'a>(
        &'a self,
        addr: &'a str,
        credentials: &'a Credentials,
        methods: &'a [MethodDescriptor],
    ) -> BoxFuture<'a, Result<MemoryListener, TransportError>> {
        Box::pin(async move {
            if matches!(credentials, Credentials::Tls { .. }) {
                tracing::debug!(addr, "memory transport ignores TLS credentials");
            }

            let addr = match addr.strip_suffix(":0") {
                Some(host) => {
                    let port = self.network.next_port.fetch_add(1, Ordering::SeqCst);
                    format!("{host}:{port}")
                }
                None => addr.to_string(),
            };

            let mut listeners = self.network.listeners.lock();
            if listeners.contains_key(&addr) {
                return Err(TransportError::Bind {
                    addr,
                    reason: "address already in use".to_string(),
                });
            }

            let (tx, rx) = mpsc::channel(self.network.capacity);
            listeners.insert(
                addr.clone(),
                Endpoint {
                    calls: tx,
                    methods: methods.to_vec(),
                },
            );

            Ok(MemoryListener {
                addr,
                calls: rx,
                network: Arc::clone(&self.network),
            })
        })
    }
}

/// Listener produced by [`MemoryTransport`]. Unbinds its address on drop.
#[derive(Debug)]
pub struct MemoryListener {
    addr: String,
    calls: mpsc::Receiver<IncomingCall>,
    network: Arc<Network>,
}

impl Listener for MemoryListener {
    fn local_addr(&self) -> String {
        self.addr.clone()
    }

    fn accept(&mut self) -> BoxFuture<'_, Option<IncomingCall>> {
        Box::pin(self.calls.recv())
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.listeners.lock().remove(&self.addr);
    }
}

/// Outgoing side of a call, forwarding every event to the client.
#[derive(Debug)]
pub(crate) struct MemorySink {
    events: mpsc::Sender<CallEvent>,
}

impl MemorySink {
    pub(crate) fn new(events: mpsc::Sender<CallEvent>) -> Self {
        Self { events }
    }

    async fn emit(&self, event: CallEvent) -> Result<(), TransportError> {
        self.events
            .send(event)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

impl CallSink for MemorySink {
    fn send_header(&self, header: Metadata) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(self.emit(CallEvent::Header(header)))
    }

    fn send_message(&self, message: Message) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(self.emit(CallEvent::Message(message)))
    }

    fn finish(&self, status: Status) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(self.emit(CallEvent::Status(status)))
    }
}
