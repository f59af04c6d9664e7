//! # Thales
//!
//! **Koa-style composable middleware for RPC services**
//!
//! Thales sits between an RPC transport and application handlers. Every call,
//! whatever its shape, is handed to an ordered chain of middleware sharing a
//! single `(ctx, next)` signature:
//!
//! - **One context for four shapes** – unary, client-stream, server-stream
//!   and duplex calls all arrive as a [`Context`](core::Context)
//! - **Onion dispatch** – pre-hooks run top to bottom, post-hooks bottom to top
//! - **Send-once headers** – staged header fields, explicit flush, trailers
//!   delivered with the terminal status
//! - **One error path** – failures become a status, are logged once, and are
//!   reported to a single injected error hook
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use thales::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_defaults().with_env_prefix("THALES").load()?;
//!     init_logging(&LogConfig::from(&config.logging))?;
//!
//!     let registry = Registry::new()
//!         .service(ServiceDescriptor::new("helloworld.Greeter").unary("SayHello"))
//!         .use_global(CallMetricsMiddleware::new())
//!         .use_method("sayHello", chain![handler_fn(|ctx| Box::pin(async move {
//!             let name = ctx.request().and_then(|m| m["name"].as_str()).unwrap_or("world");
//!             let reply = serde_json::json!({ "message": format!("hello {name}") });
//!             ctx.set_response(reply);
//!             Ok(())
//!         }))]);
//!
//!     let server = App::from_config(registry, &config)
//!         .error_hook(MetricsErrorHook)
//!         .listen(&transport, &Credentials::Insecure)
//!         .await?;
//!
//!     server.close_on(ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Transport ─▶ Listener ─▶ accept loop ─▶ adapter ─▶ global ─▶ service ─▶ method ─▶ handler
//!                                            │                                         │
//!                        status + trailer ◀──┴── error pipeline ◀──── failure ◀────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/thales/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use thales_core as core;

// Re-export middleware composition
pub use thales_middleware as middleware;

// Re-export configuration
pub use thales_config as config;

// Re-export logging and metrics
pub use thales_telemetry as telemetry;

// Re-export registry, adapters and lifecycle
pub use thales_server as server;

pub use thales_middleware::chain;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use thales::prelude::*;
/// ```
pub mod prelude {
    pub use thales_core::{
        AppInfo, CallError, CallResult, CallType, Code, Context, Credentials, ErrorHook,
        IntoMetadata, Message, MessageStream, Metadata, RequestStream, ResponseWriter, Status,
        Transport,
    };

    pub use thales_middleware::{
        chain, compose, from_fn, handler_fn, Chain, FnMiddleware, HandlerFn, Middleware, Next,
    };

    pub use thales_config::{ConfigLoader, ThalesConfig};

    pub use thales_telemetry::{
        init_logging, CallMetricsMiddleware, LogConfig, MetricsErrorHook,
    };

    pub use thales_server::{
        App, ErrorConfig, Registry, RunningServer, ServiceDescriptor, ServiceMap, ShutdownSignal,
    };
}
