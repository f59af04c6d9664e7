//! # Thales Core
//!
//! Core call types for the Thales RPC middleware framework.
//!
//! This crate provides the types every other Thales crate builds on:
//!
//! - [`Context`] - Per-call state threaded through the middleware chain
//! - [`MetadataState`] - Send-once header and trailer bookkeeping
//! - [`Status`] / [`Code`] - Terminal call status
//! - [`CallError`] - Failures surfacing from a chain
//! - [`RequestStream`] / [`ResponseWriter`] - Backpressured message streams
//! - [`Transport`] / [`CallSink`] - Seams to the RPC transport
//! - [`ErrorHook`] - Observer for call-level failures

#![doc(html_root_url = "https://docs.rs/thales-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;
mod call;
mod cancel;
mod context;
mod error;
mod hook;
pub mod metadata;
mod status;
pub mod stream;
pub mod transport;

pub use app::AppInfo;
pub use call::{CallHandle, CallType, EndReason, ResponseWriter};
pub use cancel::CancelSignal;
pub use context::{Context, Request, RequestId, Response};
pub use error::{CallError, CallResult, ContractViolation, MiddlewareReentryError, TransportError};
pub use hook::{ErrorHook, NoopErrorHook};
pub use metadata::{IntoMetadata, Metadata, MetadataState};
pub use status::{Code, Status};
pub use stream::{Message, MessageStream, RequestSender, RequestStream};
pub use transport::{
    BoxFuture, CallSink, Credentials, IncomingCall, IncomingRequest, Listener, MethodDescriptor,
    Transport,
};
