//! RPC client implementation.

use crate::error::{CodecError, ConnectionError, Error, Result};
use crate::protocol::framing::MAX_FRAME_SIZE;
use crate::protocol::{ErrorInfo, Frame, FrameType, RequestEnvelope};
use crate::transport::connection::{
    Connection, ConnectionHealth, ConnectionSettings, EventSender, ReplyEvent,
};
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Configuration for the RPC client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default call timeout, applied to the first reply event and to every
    /// subsequent stream chunk.
    pub timeout: Duration,
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Heartbeat interval. `None` disables heartbeats and silence detection.
    pub heartbeat: Option<Duration>,
    /// Never send heartbeats; only answer what the server sends.
    pub passive_heartbeat: bool,
    /// Maximum frame size.
    pub max_frame_size: usize,
    /// Unread chunks a streamed reply may hold before it is failed with
    /// [`Error::StreamOverflow`].
    pub stream_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            heartbeat: Some(Duration::from_secs(5)),
            passive_heartbeat: false,
            max_frame_size: MAX_FRAME_SIZE,
            stream_buffer: 32,
        }
    }
}

impl ClientConfig {
    const fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            connect_timeout: self.connect_timeout,
            heartbeat: self.heartbeat,
            passive_heartbeat: self.passive_heartbeat,
            max_frame_size: self.max_frame_size,
        }
    }
}

/// Rewrites error replies into caller-specific errors.
///
/// The hook sees every error reply before it is returned, including the
/// encoded error payload, and usually maps it to [`Error::Application`].
pub type RemoteErrorHook = Arc<dyn Fn(ErrorInfo) -> Error + Send + Sync>;

/// A streamed reply: one item per chunk, ending after the last chunk or the
/// first error.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Reply to a call.
pub enum Reply {
    /// Unary reply payload.
    Single(Bytes),
    /// Streamed reply.
    Stream(ReplyStream),
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(bytes) => f.debug_tuple("Single").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Builder for creating RPC clients.
#[derive(Default)]
pub struct ClientBuilder {
    addr: Option<SocketAddr>,
    config: ClientConfig,
    hook: Option<RemoteErrorHook>,
}

impl ClientBuilder {
    /// Create a new client builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server address to connect to.
    #[must_use]
    pub const fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default call timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the heartbeat interval, or disable heartbeats with `None`.
    #[must_use]
    pub const fn heartbeat(mut self, heartbeat: Option<Duration>) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    /// Only answer heartbeats, never send them.
    #[must_use]
    pub const fn passive_heartbeat(mut self, passive: bool) -> Self {
        self.config.passive_heartbeat = passive;
        self
    }

    /// Install a hook that rewrites error replies.
    #[must_use]
    pub fn on_remote_error(mut self, hook: RemoteErrorHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Connect to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if no address was given or the connection fails.
    pub async fn connect(self) -> Result<RpcClient> {
        let addr = self.addr.ok_or_else(|| {
            Error::from(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "server address not specified",
            ))
        })?;

        let connection = Connection::open(addr, self.config.settings()).await?;

        Ok(RpcClient {
            connection,
            config: self.config,
            hook: self.hook,
        })
    }
}

/// RPC client for making calls over a single multiplexed connection.
pub struct RpcClient {
    connection: Connection,
    config: ClientConfig,
    hook: Option<RemoteErrorHook>,
}

impl RpcClient {
    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The server address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.connection.addr()
    }

    /// The client configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether the connection is still usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.health() == ConnectionHealth::Healthy
    }

    /// Call a method with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails, times out, or the server replies
    /// with an error.
    pub async fn call(&self, method: &str, args: Vec<Bytes>) -> Result<Reply> {
        self.call_with_timeout(method, args, self.config.timeout)
            .await
    }

    /// Call a method with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails, times out, or the server replies
    /// with an error.
    #[instrument(skip(self, args), fields(args = args.len()))]
    pub async fn call_with_timeout(
        &self,
        method: &str,
        args: Vec<Bytes>,
        call_timeout: Duration,
    ) -> Result<Reply> {
        let id = Uuid::new_v4();
        let envelope = RequestEnvelope {
            id,
            method: method.to_string(),
            args,
        };
        let payload = bincode::serialize(&envelope)
            .map(Bytes::from)
            .map_err(CodecError::from)?;

        // One extra slot carries the overflow error
        let (tx, mut rx) = mpsc::channel(self.config.stream_buffer.max(1) + 1);
        self.connection.register(id, tx)?;

        debug!("Sending request {} for method {}", id, method);

        if let Err(e) = self
            .connection
            .send_frame(Frame::new(FrameType::Request, payload))
            .await
        {
            self.connection.forget(&id);
            return Err(e);
        }

        let first = match timeout(call_timeout, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.connection.forget(&id);
                return Err(ConnectionError::Closed.into());
            }
            Err(_) => {
                self.connection.forget(&id);
                return Err(Error::Timeout(call_timeout));
            }
        };

        match first? {
            ReplyEvent::Single(bytes) => Ok(Reply::Single(bytes)),
            ReplyEvent::Failed(info) => Err(intercept(self.hook.as_ref(), info)),
            ReplyEvent::End => Ok(Reply::Stream(stream::empty().boxed())),
            ReplyEvent::Chunk(first) => Ok(Reply::Stream(reply_stream(StreamState {
                id,
                first: Some(first),
                rx,
                pending: self.connection.pending(),
                hook: self.hook.clone(),
                chunk_timeout: call_timeout,
                done: false,
            }))),
        }
    }

    /// Number of calls and streams still waiting on the server.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.connection.in_flight_count()
    }

    /// Close the connection.
    pub async fn close(&self) {
        self.connection.close().await;
    }
}

fn intercept(hook: Option<&RemoteErrorHook>, info: ErrorInfo) -> Error {
    match hook {
        Some(hook) => hook(info),
        None => Error::Remote(info),
    }
}

struct StreamState {
    id: Uuid,
    first: Option<Bytes>,
    rx: mpsc::Receiver<Result<ReplyEvent>>,
    pending: Arc<DashMap<Uuid, EventSender>>,
    hook: Option<RemoteErrorHook>,
    chunk_timeout: Duration,
    done: bool,
}

fn reply_stream(state: StreamState) -> ReplyStream {
    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        if let Some(chunk) = state.first.take() {
            return Some((Ok(chunk), state));
        }

        let failure = match timeout(state.chunk_timeout, state.rx.recv()).await {
            Ok(Some(Ok(ReplyEvent::Chunk(chunk) | ReplyEvent::Single(chunk)))) => {
                return Some((Ok(chunk), state));
            }
            Ok(Some(Ok(ReplyEvent::End))) => return None,
            Ok(Some(Ok(ReplyEvent::Failed(info)))) => intercept(state.hook.as_ref(), info),
            Ok(Some(Err(e))) => e,
            Ok(None) => ConnectionError::Closed.into(),
            Err(_) => {
                state.pending.remove(&state.id);
                Error::Timeout(state.chunk_timeout)
            }
        };

        state.done = true;
        Some((Err(failure), state))
    })
    .boxed()
}
