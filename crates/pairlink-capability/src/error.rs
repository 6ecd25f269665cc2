//! Capability error types.

use thiserror::Error;

/// Errors that can occur on the helper process transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to terminate the process.
    #[error("failed to terminate process: {0}")]
    TerminateFailed(std::io::Error),
}

/// Errors reported by a messaging capability.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// A call was made before `initialize`.
    #[error("capability not initialized")]
    NotInitialized,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The remote side answered with an error.
    #[error("remote error (code {code}): {message}")]
    Remote { code: i32, message: String },

    /// Malformed message from the remote side.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The capability shut down while a call was in flight.
    #[error("capability closed")]
    Closed,

    /// No answer within the configured time.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CapabilityError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn remote(code: i32, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }
}

impl From<CapabilityError> for pairlink_core::Error {
    fn from(e: CapabilityError) -> Self {
        pairlink_core::Error::Capability(e.to_string())
    }
}
