//! Server lifecycle.
//!
//! An [`App`] bundles the service registry with the error pipeline, the
//! application info, and the server configuration. Starting it finalizes the
//! registry into a route table, binds the transport, and spawns an accept
//! loop that serves every call on its own task.
//!
//! # Example
//!
//! ```rust,ignore
//! use thales_server::{App, Registry, ServiceDescriptor};
//!
//! let registry = Registry::new()
//!     .service(ServiceDescriptor::new("helloworld.Greeter").unary("SayHello"))
//!     .use_method("sayHello", chain![say_hello]);
//!
//! let server = App::new(registry)
//!     .error_hook(|err: &CallError, ctx: &Context| {
//!         tracing::warn!(method = ctx.method(), error = %err, "call failed");
//!     })
//!     .start(&transport, "127.0.0.1:50051", &Credentials::Insecure)
//!     .await?;
//!
//! server.close().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use thales_config::ThalesConfig;
use thales_core::{AppInfo, Credentials, ErrorHook, Listener, NoopErrorHook, Transport, TransportError};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::adapter::{serve_call, CallEnv};
use crate::config::ServerConfig;
use crate::error_pipeline::{ErrorConfig, ErrorPipeline};
use crate::registry::{Registry, RegistryError};
use crate::shutdown::{CallTracker, ShutdownSignal};

/// How long cancelled calls get to deliver their status after the
/// shutdown timeout expired.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The registry could not be finalized.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The transport could not bind the address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The requested address.
        addr: String,
        /// The transport's error.
        #[source]
        source: TransportError,
    },

    /// The accept loop task failed.
    #[error("accept loop failed: {0}")]
    AcceptLoop(String),
}

/// An application: registry plus everything calls share.
pub struct App {
    info: AppInfo,
    registry: Registry,
    config: ServerConfig,
    errors: ErrorConfig,
    hook: Arc<dyn ErrorHook>,
}

impl App {
    /// Creates an app with default configuration and no error hook.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            info: AppInfo::default(),
            registry,
            config: ServerConfig::default(),
            errors: ErrorConfig::default(),
            hook: Arc::new(NoopErrorHook),
        }
    }

    /// Creates an app configured from a loaded [`ThalesConfig`].
    #[must_use]
    pub fn from_config(registry: Registry, config: &ThalesConfig) -> Self {
        Self::new(registry)
            .info(AppInfo::new(&config.app.name).with_environment(&config.app.environment))
            .server_config(ServerConfig::from(&config.server))
            .errors(ErrorConfig::from(config.errors))
    }

    /// Sets the application info handed to every call.
    #[must_use]
    pub fn info(mut self, info: AppInfo) -> Self {
        self.info = info;
        self
    }

    /// Sets the server configuration.
    #[must_use]
    pub fn server_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the error reporting configuration.
    #[must_use]
    pub fn errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Installs the error hook, replacing any previous one.
    #[must_use]
    pub fn error_hook(mut self, hook: impl ErrorHook) -> Self {
        self.hook = Arc::new(hook);
        self
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Starts serving on the configured address.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start).
    pub async fn listen<T: Transport>(
        self,
        transport: &T,
        credentials: &Credentials,
    ) -> Result<RunningServer, ServerError> {
        let addr = self.config.addr().to_string();
        self.start(transport, &addr, credentials).await
    }

    /// Finalizes the registry, binds `addr`, and starts accepting calls.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Registry` if the registrations are invalid and
    /// `ServerError::Bind` if the transport cannot bind.
    pub async fn start<T: Transport>(
        self,
        transport: &T,
        addr: &str,
        credentials: &Credentials,
    ) -> Result<RunningServer, ServerError> {
        let routes = self.registry.build()?;

        let listener = transport
            .bind(addr, credentials, routes.descriptors())
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr();

        tracing::info!(
            addr = %local_addr,
            app = self.info.name(),
            methods = routes.descriptors().len(),
            "server listening"
        );

        let env = CallEnv {
            routes: Arc::new(routes),
            pipeline: ErrorPipeline::new(self.errors, self.hook),
            app: Arc::new(self.info),
        };
        let shutdown = ShutdownSignal::new();
        let tracker = CallTracker::new();
        let accept_loop = tokio::spawn(accept_loop(
            listener,
            env,
            shutdown.clone(),
            tracker.clone(),
        ));

        Ok(RunningServer {
            local_addr,
            shutdown,
            tracker,
            accept_loop,
            shutdown_timeout: self.config.shutdown_timeout(),
        })
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("info", &self.info)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

async fn accept_loop<L: Listener>(
    mut listener: L,
    env: CallEnv,
    shutdown: ShutdownSignal,
    tracker: CallTracker,
) {
    loop {
        let incoming = tokio::select! {
            biased;
            () = shutdown.recv() => {
                tracing::info!("shutdown signal received, no longer accepting calls");
                break;
            }
            incoming = listener.accept() => incoming,
        };

        let Some(incoming) = incoming else {
            tracing::info!("listener closed");
            break;
        };

        let token = tracker.track(incoming.cancel.clone());
        let env = env.clone();
        tokio::spawn(async move {
            if let Err(violation) = serve_call(incoming, &env).await {
                tracing::error!(error = %violation, "middleware contract violated");
            }
            drop(token);
        });
    }
}

/// Handle to a started server.
#[derive(Debug)]
pub struct RunningServer {
    local_addr: String,
    shutdown: ShutdownSignal,
    tracker: CallTracker,
    accept_loop: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl RunningServer {
    /// Returns the address the transport bound.
    #[must_use]
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Returns the number of calls in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }

    /// Returns a signal that stops the accept loop when triggered.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Stops accepting calls and waits for in-flight calls to drain.
    ///
    /// Calls still running after the shutdown timeout are cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::AcceptLoop` if the accept loop panicked.
    pub async fn close(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        self.accept_loop
            .await
            .map_err(|e| ServerError::AcceptLoop(e.to_string()))?;

        tracing::info!(
            in_flight = self.tracker.in_flight(),
            timeout = ?self.shutdown_timeout,
            "waiting for in-flight calls"
        );

        if !self.tracker.wait_idle_for(self.shutdown_timeout).await {
            let cancelled = self.tracker.cancel_all();
            tracing::warn!(cancelled, "shutdown timeout reached, cancelling remaining calls");
            if !self.tracker.wait_idle_for(CANCEL_GRACE).await {
                tracing::warn!(
                    in_flight = self.tracker.in_flight(),
                    grace = ?CANCEL_GRACE,
                    "calls still running after cancellation grace period"
                );
            }
        }

        tracing::info!("server stopped");
        Ok(())
    }

    /// Waits for `signal`, then closes the server.
    ///
    /// # Errors
    ///
    /// See [`close`](Self::close).
    pub async fn close_on(self, signal: ShutdownSignal) -> Result<(), ServerError> {
        tokio::select! {
            () = signal.recv() => {}
            () = self.shutdown.recv() => {}
        }
        self.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use thales_core::{
        BoxFuture, CallSink, CancelSignal, IncomingCall, IncomingRequest, Message, Metadata,
        MethodDescriptor, Status,
    };
    use thales_middleware::{chain, handler_fn};
    use tokio::sync::{mpsc, oneshot};

    use crate::registry::ServiceDescriptor;

    struct ChannelTransport {
        calls: Mutex<Option<mpsc::Receiver<IncomingCall>>>,
        bound: Mutex<Vec<MethodDescriptor>>,
    }

    struct ChannelListener {
        calls: mpsc::Receiver<IncomingCall>,
    }

    impl Transport for ChannelTransport {
        type Listener = ChannelListener;

        fn bind<'a>(
            &'a self,
            _addr: &'a str,
            _credentials: &'a Credentials,
            methods: &'a [MethodDescriptor],
        ) -> BoxFuture<'a, Result<ChannelListener, TransportError>> {
            Box::pin(async move {
                *self.bound.lock() = methods.to_vec();
                let calls = self.calls.lock().take().ok_or(TransportError::Closed)?;
                Ok(ChannelListener { calls })
            })
        }
    }

    impl Listener for ChannelListener {
        fn local_addr(&self) -> String {
            "memory:0".to_string()
        }

        fn accept(&mut self) -> BoxFuture<'_, Option<IncomingCall>> {
            Box::pin(self.calls.recv())
        }
    }

    struct StatusSink(Mutex<Option<oneshot::Sender<Status>>>);

    impl CallSink for StatusSink {
        fn send_header(&self, _header: Metadata) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }

        fn send_message(&self, _message: Message) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }

        fn finish(&self, status: Status) -> BoxFuture<'_, Result<(), TransportError>> {
            if let Some(tx) = self.0.lock().take() {
                let _ = tx.send(status);
            }
            Box::pin(async { Ok(()) })
        }
    }

    fn transport() -> (ChannelTransport, mpsc::Sender<IncomingCall>) {
        let (tx, rx) = mpsc::channel(8);
        let transport = ChannelTransport {
            calls: Mutex::new(Some(rx)),
            bound: Mutex::new(Vec::new()),
        };
        (transport, tx)
    }

    fn call(method: &str) -> (IncomingCall, oneshot::Receiver<Status>) {
        let (tx, rx) = oneshot::channel();
        let call = IncomingCall {
            service: "test.Svc".to_string(),
            method: method.to_string(),
            metadata: Metadata::new(),
            request: IncomingRequest::Message(json!({})),
            sink: Arc::new(StatusSink(Mutex::new(Some(tx)))),
            cancel: CancelSignal::new(),
            peer: None,
        };
        (call, rx)
    }

    fn registry() -> Registry {
        Registry::new()
            .service(
                ServiceDescriptor::new("test.Svc")
                    .unary("Fast")
                    .unary("Slow"),
            )
            .use_method("Fast", chain![handler_fn(|_ctx| Box::pin(async { Ok(()) }))])
            .use_method(
                "Slow",
                chain![handler_fn(|ctx| Box::pin(async move {
                    ctx.cancelled().await;
                    Ok(())
                }))],
            )
    }

    #[tokio::test]
    async fn test_start_binds_declared_methods() {
        let (transport, _tx) = transport();
        let server = App::new(registry())
            .start(&transport, "memory:0", &Credentials::Insecure)
            .await
            .unwrap();

        assert_eq!(server.local_addr(), "memory:0");
        let bound = transport.bound.lock().clone();
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0].method, "Fast");

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_registry() {
        let (transport, _tx) = transport();
        let err = App::new(Registry::new())
            .start(&transport, "memory:0", &Credentials::Insecure)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Registry(RegistryError::NoServices)));
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let (transport, _tx) = transport();
        transport.calls.lock().take();
        let err = App::new(registry())
            .start(&transport, "memory:0", &Credentials::Insecure)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_serves_calls_until_closed() {
        let (transport, tx) = transport();
        let server = App::new(registry())
            .start(&transport, "memory:0", &Credentials::Insecure)
            .await
            .unwrap();

        let (incoming, status) = call("Fast");
        tx.send(incoming).await.unwrap();
        assert!(status.await.unwrap().is_ok());

        let (incoming, status) = call("Missing");
        tx.send(incoming).await.unwrap();
        assert_eq!(status.await.unwrap().code(), thales_core::Code::Unimplemented);

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_cancels_stragglers_after_timeout() {
        let (transport, tx) = transport();
        let config = ServerConfig::builder()
            .shutdown_timeout(Duration::from_millis(50))
            .build();
        let server = App::new(registry())
            .server_config(config)
            .start(&transport, "memory:0", &Credentials::Insecure)
            .await
            .unwrap();

        let (incoming, status) = call("Slow");
        tx.send(incoming).await.unwrap();
        while server.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        server.close().await.unwrap();
        let status = status.await.unwrap();
        assert!(!status.is_ok());
    }

    #[test]
    fn test_from_config() {
        let mut config = ThalesConfig::default();
        config.server.shutdown_timeout_secs = 5;
        config.errors.silent = true;
        let app = App::from_config(registry(), &config);
        assert_eq!(app.config().shutdown_timeout(), Duration::from_secs(5));
        assert!(app.errors.silent);
    }
}
