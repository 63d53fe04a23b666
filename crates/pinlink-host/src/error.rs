//! Caller-facing error type for session operations.

use pinlink_core::ProtocolError;
use thiserror::Error;

/// Errors returned by [`crate::Session`] and its handles.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection is not verified, or dropped while the call was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The call is not valid in the current state (pin busy, stale handle,
    /// unsupported mode, bad argument).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A shared peripheral module is already in use.
    #[error("out of resource: {0}")]
    OutOfResource(String),

    /// The wait was cancelled by `abort_connection` or `disconnect`.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The transport could not be opened.
    #[error("failed to open transport: {0}")]
    TransportOpen(#[source] std::io::Error),

    /// A command could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SessionError::InvalidOperation(msg.into())
    }
}
