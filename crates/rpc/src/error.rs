//! Error types for the RPC transport.

use crate::protocol::message::{ErrorCode, ErrorInfo};

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for RPC operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-related errors.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Protocol-level errors.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Codec errors during serialization/deserialization.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Handler errors from the server side.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// The server replied on the error channel and no hook rewrote it.
    #[error("Remote error [{}]: {}", .0.code, .0.message)]
    Remote(ErrorInfo),

    /// An application error produced by a [`crate::RemoteErrorHook`].
    #[error("{0}")]
    Application(Box<dyn std::error::Error + Send + Sync>),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Channel closed unexpectedly.
    #[error("Channel closed")]
    ChannelClosed,

    /// A streamed reply was dropped because its reader left this many
    /// chunks unread.
    #[error("Stream reader fell behind: {0} chunks left unread")]
    StreamOverflow(usize),
}

impl Error {
    /// Whether this error means the connection itself is unusable or slow,
    /// as opposed to the remote side rejecting the call.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Timeout(_)
                | Self::Io(_)
                | Self::ChannelClosed
                | Self::StreamOverflow(_)
        )
    }
}

/// Connection-specific errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to establish connection.
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        /// The address we tried to connect to.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Connection closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    Closed,

    /// No frame, heartbeat included, arrived for too long.
    #[error("Connection lost: no traffic for {0:?}")]
    Lost(Duration),

    /// Connection is shutting down.
    #[error("Connection is shutting down")]
    ShuttingDown,
}

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Invalid frame received.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame too large.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Checksum mismatch.
    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },
}

/// Codec-related errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Failed to serialize: {0}")]
    SerializationFailed(String),

    /// Deserialization failed.
    #[error("Failed to deserialize: {0}")]
    DeserializationFailed(String),
}

/// Handler errors from server-side processing.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler not found for method.
    #[error("No handler registered for method: {0}")]
    NotFound(String),

    /// The wire arguments could not be decoded.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler raised an application-level error.
    #[error("{message}")]
    Application {
        /// Human-readable message, always present.
        message: String,
        /// Encoded error object, when the handler could encode one.
        payload: Option<bytes::Bytes>,
    },

    /// Handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Handler returned an error.
    #[error("Handler error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Convert into the wire form sent on the error channel.
    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        let (code, payload) = match self {
            Self::NotFound(_) => (ErrorCode::NotFound, None),
            Self::InvalidArguments(_) => (ErrorCode::Protocol, None),
            Self::Application { payload, .. } => (ErrorCode::Application, payload.clone()),
            Self::Panicked(_) => (ErrorCode::Panicked, None),
            Self::Internal(_) => (ErrorCode::Internal, None),
        };

        ErrorInfo {
            code,
            message: self.to_string(),
            payload,
        }
    }
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<ciborium::de::Error<io::Error>> for CodecError {
    fn from(err: ciborium::de::Error<io::Error>) -> Self {
        Self::DeserializationFailed(err.to_string())
    }
}

impl From<ciborium::ser::Error<io::Error>> for CodecError {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_codes() {
        let info = HandlerError::NotFound("missing".into()).to_error_info();
        assert_eq!(info.code, ErrorCode::NotFound);
        assert!(info.message.contains("missing"));

        let info = HandlerError::Application {
            message: "boom".into(),
            payload: Some(bytes::Bytes::from_static(b"\x01")),
        }
        .to_error_info();
        assert_eq!(info.code, ErrorCode::Application);
        assert_eq!(info.message, "boom");
        assert_eq!(info.payload.as_deref(), Some(&b"\x01"[..]));
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_connectivity());
        assert!(Error::from(ConnectionError::Closed).is_connectivity());
        assert!(Error::StreamOverflow(32).is_connectivity());
        assert!(!Error::from(HandlerError::Internal("x".into())).is_connectivity());
    }
}
