//! Request, reply and error envelopes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Built-in method returning the server name.
pub const NAME_METHOD: &str = "_name";

/// Built-in method returning the names of every callable method.
pub const METHODS_METHOD: &str = "_methods";

/// Request envelope for wire format.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation.
    pub id: Uuid,
    /// Method being called.
    pub method: String,
    /// Positional wire arguments, opaque to the transport.
    pub args: Vec<Bytes>,
}

/// Reply envelope, shared by unary replies, stream chunks and stream ends.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Request ID this reply is for.
    pub request_id: Uuid,
    /// Reply payload; empty for end-of-stream.
    pub payload: Bytes,
    /// Set when the call failed.
    pub error: Option<ErrorInfo>,
}

/// Classification of an error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The handler raised an application error.
    Application,
    /// No such method.
    NotFound,
    /// The request could not be understood.
    Protocol,
    /// The handler panicked.
    Panicked,
    /// Any other server-side failure.
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::Application => "APPLICATION",
            Self::NotFound => "NOT_FOUND",
            Self::Protocol => "PROTOCOL",
            Self::Panicked => "PANICKED",
            Self::Internal => "INTERNAL",
        };
        f.write_str(code)
    }
}

/// Error information for failed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code for categorization.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Optional encoded error object for hooks that understand it.
    pub payload: Option<Bytes>,
}
