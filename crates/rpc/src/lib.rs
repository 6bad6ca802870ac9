//! Message-based RPC transport over TCP.
//!
//! This crate moves named calls between a client and a server. It knows
//! nothing about what the calls mean: arguments and replies are opaque byte
//! payloads, and errors carry an optional opaque payload that callers can
//! rewrite through a [`RemoteErrorHook`].
//!
//! # Features
//!
//! - **Request/reply**: one request frame, one reply or error frame
//! - **Streamed replies**: chunk frames terminated by an end-of-stream frame
//! - **Multiplexing**: concurrent calls share one connection, correlated by id
//! - **Liveness**: heartbeats and silence detection on the client
//! - **Introspection**: every server answers `_name` and `_methods`
//!
//! # Example
//!
//! ```no_run
//! use proven_rpc::{Reply, RpcClient};
//!
//! async fn example() -> proven_rpc::Result<()> {
//!     let client = RpcClient::builder()
//!         .addr(([127, 0, 0, 1], 4242).into())
//!         .connect()
//!         .await?;
//!
//!     if let Reply::Single(bytes) = client.call("echo", vec![]).await? {
//!         println!("{} bytes", bytes.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod protocol;
pub mod transport;

pub use error::{CodecError, ConnectionError, Error, HandlerError, ProtocolError, Result};
pub use protocol::{
    codec,
    message::{ErrorCode, ErrorInfo, METHODS_METHOD, NAME_METHOD},
};
pub use transport::{
    client::{ClientBuilder, ClientConfig, RemoteErrorHook, Reply, ReplyStream, RpcClient},
    server::{HandlerResponse, RpcHandler, RpcServer, ServerConfig, ServerHandle},
};

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
