//! Error types for Thales.
//!
//! Errors fall into two groups:
//!
//! | Group | Type | Delivered to caller |
//! |---|---|---|
//! | Call-level failure | [`CallError`] | As a [`Status`] with trailer metadata |
//! | Contract violation | [`ContractViolation`] | No; logged and returned to the server |
//!
//! A contract violation means the middleware or handler code is buggy: a
//! panic with a non-error payload, or `next` invoked twice by one element.

use crate::status::{Code, Status};
use thiserror::Error;

/// Result type alias for middleware, handlers, and stream operations.
pub type CallResult<T = ()> = Result<T, CallError>;

/// Raised when a middleware element invokes `next` more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("next() called multiple times")]
pub struct MiddlewareReentryError;

/// Errors reported by the transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Binding the listen address failed.
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// The requested address.
        addr: String,
        /// Why binding failed.
        reason: String,
    },

    /// The peer went away or the call was already terminated.
    #[error("call closed by peer")]
    Closed,

    /// Any other transport failure.
    #[error("transport failure: {0}")]
    Other(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A failure surfacing from a middleware chain or a stream operation.
///
/// # Example
///
/// ```
/// use thales_core::{CallError, Code, Status};
///
/// let err: CallError = Status::not_found("missing").into();
/// assert_eq!(err.status().code(), Code::NotFound);
///
/// let err: CallError = anyhow::anyhow!("boom").into();
/// assert_eq!(err.status().code(), Code::Unknown);
/// assert_eq!(err.status().message(), "boom");
/// ```
#[derive(Debug, Error)]
pub enum CallError {
    /// Explicit application error carrying the status to deliver.
    #[error(transparent)]
    Status(Status),

    /// `next` was invoked more than once.
    #[error(transparent)]
    Reentry(#[from] MiddlewareReentryError),

    /// The call was terminated by either side.
    #[error("call cancelled")]
    Cancelled,

    /// Write attempted after the response stream was ended.
    #[error("response stream already ended")]
    StreamClosed,

    /// The transport delivered a request that does not match the method shape.
    #[error("request shape mismatch: expected {expected}")]
    ShapeMismatch {
        /// The shape the route declares.
        expected: &'static str,
    },

    /// The transport failed while the call was in flight.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Any other error raised by application code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CallError {
    /// Creates an opaque error from a message.
    #[must_use]
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Other(anyhow::Error::msg(message))
    }

    /// Returns the status code derived from this error.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::Status(status) => status.code(),
            Self::Cancelled => Code::Cancelled,
            Self::StreamClosed => Code::FailedPrecondition,
            Self::Reentry(_) | Self::ShapeMismatch { .. } | Self::Transport(_) => Code::Internal,
            Self::Other(_) => Code::Unknown,
        }
    }

    /// Derives the status delivered to the caller.
    ///
    /// Unrecognized errors become [`Code::Unknown`] carrying the error's
    /// message.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Status(status) => status.clone(),
            other => Status::new(other.code(), other.to_string()),
        }
    }

    /// Returns `true` if this error is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<Status> for CallError {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Status(Status::invalid_argument(err.to_string()))
    }
}

/// Bug in middleware or handler code, detected at the call boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    /// A panic whose payload is not an error value.
    #[error("non-error thrown: {0}")]
    NonError(String),

    /// A middleware element invoked `next` more than once.
    #[error(transparent)]
    Reentry(#[from] MiddlewareReentryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_keeps_code() {
        let err = CallError::from(Status::permission_denied("nope").with_metadata("a", "b"));
        let status = err.status();
        assert_eq!(status.code(), Code::PermissionDenied);
        assert_eq!(status.message(), "nope");
        assert_eq!(status.metadata().get("a"), Some("b"));
    }

    #[test]
    fn test_other_error_defaults_to_unknown() {
        let err = CallError::msg("boom");
        assert_eq!(err.code(), Code::Unknown);
        assert_eq!(err.status().message(), "boom");
    }

    #[test]
    fn test_reentry_message() {
        let err = CallError::from(MiddlewareReentryError);
        assert_eq!(err.to_string(), "next() called multiple times");
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn test_non_error_message() {
        let violation = ContractViolation::NonError("foo".to_string());
        assert_eq!(violation.to_string(), "non-error thrown: foo");
    }

    #[test]
    fn test_serde_error_is_invalid_argument() {
        let err: CallError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_cancelled() {
        assert!(CallError::Cancelled.is_cancelled());
        assert_eq!(CallError::Cancelled.code(), Code::Cancelled);
    }
}
