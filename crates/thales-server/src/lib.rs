//! # Thales Server
//!
//! Service registry, call adapters, error pipeline and server lifecycle for
//! the Thales RPC middleware framework.
//!
//! ## Overview
//!
//! - [`Registry`] - Declares services and registers middleware chains
//! - [`RouteTable`] - Immutable routes produced by [`Registry::build`]
//! - [`ErrorPipeline`] - Turns chain failures into a status and reports them
//! - [`App`] / [`RunningServer`] - Binds a transport and serves calls
//! - [`ShutdownSignal`] / [`CallTracker`] - Graceful shutdown
//!
//! ## Example
//!
//! ```rust,ignore
//! use thales_server::{App, Registry, ServiceDescriptor, ShutdownSignal};
//!
//! let registry = Registry::new()
//!     .service(ServiceDescriptor::new("helloworld.Greeter").unary("SayHello"))
//!     .use_global(logger)
//!     .use_method("sayHello", chain![mw1, upper]);
//!
//! let server = App::new(registry)
//!     .listen(&transport, &Credentials::Insecure)
//!     .await?;
//!
//! server.close_on(ShutdownSignal::with_os_signals()).await?;
//! ```

#![doc(html_root_url = "https://docs.rs/thales-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod adapter;
mod config;
pub mod error_pipeline;
pub mod registry;
mod server;
pub mod shutdown;

pub use adapter::{serve_call, CallEnv};
pub use config::{
    ServerConfig, ServerConfigBuilder, DEFAULT_ADDR, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
    DEFAULT_STREAM_CAPACITY,
};
pub use error_pipeline::{render, ErrorConfig, ErrorPipeline, Thrown, ERROR_TARGET};
pub use registry::{
    Registry, RegistryError, Route, RouteTable, ServiceDescriptor, ServiceMap,
};
pub use server::{App, RunningServer, ServerError};
pub use shutdown::{CallToken, CallTracker, ShutdownSignal};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
