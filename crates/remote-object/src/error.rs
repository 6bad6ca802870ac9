//! Error types for remote objects.

use crate::value::Exception;

use proven_rpc::ErrorCode;
use thiserror::Error;

/// Result type alias for remote object operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for remote object operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unrecognized wire payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The member is not exposed by the remote side.
    #[error("Unknown member: {0}")]
    UnknownMember(String),

    /// A handler raised an exception; carries the reconstructed exception.
    #[error("{0}")]
    RemoteApplication(Exception),

    /// Timeout or lost connection, as reported by the transport.
    #[error("Connectivity error: {0}")]
    Connectivity(proven_rpc::Error),

    /// No serializer could encode a value.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Invalid serializer registry configuration.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl Error {
    /// The remote exception, if this is an application error.
    #[must_use]
    pub const fn exception(&self) -> Option<&Exception> {
        match self {
            Self::RemoteApplication(exception) => Some(exception),
            _ => None,
        }
    }

    /// Whether the error came from the connection rather than the call.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

/// Serializer registration errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two serializers share a signature.
    #[error("Duplicate serializer signature: {0}")]
    DuplicateSignature(String),

    /// The catch-all signature is reserved.
    #[error("Signature {0} is reserved")]
    ReservedSignature(String),
}

/// Raised exceptions travel inside the transport error as this newtype so
/// they can be recovered intact.
#[derive(Debug, Error)]
#[error("{0}")]
pub(crate) struct RaisedException(pub Exception);

impl From<proven_rpc::Error> for Error {
    fn from(err: proven_rpc::Error) -> Self {
        use proven_rpc::Error as RpcError;

        match err {
            RpcError::Application(inner) => match inner.downcast::<RaisedException>() {
                Ok(raised) => Self::RemoteApplication(raised.0),
                Err(other) => Self::RemoteApplication(Exception::from(
                    crate::value::RemoteError::new(other.to_string()),
                )),
            },
            RpcError::Remote(info) => match info.code {
                ErrorCode::NotFound => Self::UnknownMember(info.message),
                ErrorCode::Protocol => Self::Protocol(info.message),
                ErrorCode::Application | ErrorCode::Panicked | ErrorCode::Internal => {
                    Self::RemoteApplication(Exception::from(crate::value::RemoteError::new(
                        info.message,
                    )))
                }
            },
            RpcError::Codec(e) => Self::Protocol(e.to_string()),
            RpcError::Protocol(e) => Self::Protocol(e.to_string()),
            other => Self::Connectivity(other),
        }
    }
}
