//! Test error types.

use thales_core::TransportError;
use thiserror::Error;

/// Errors that can occur while driving a call from a test.
#[derive(Debug, Error)]
pub enum TestError {
    /// Nothing is listening on the address.
    #[error("no listener bound to {0}")]
    NotListening(String),

    /// The server stopped accepting calls.
    #[error("server is not accepting calls")]
    Rejected,

    /// The call ended without a terminal status.
    #[error("call ended without a status")]
    NoStatus,

    /// The server sent events in an invalid order.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Sending a request message failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            TestError::NotListening("memory:1".into()).to_string(),
            "no listener bound to memory:1"
        );
        assert_eq!(
            TestError::Transport(TransportError::Closed).to_string(),
            "call closed by peer"
        );
    }
}
