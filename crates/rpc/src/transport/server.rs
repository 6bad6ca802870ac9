//! RPC server implementation.

use crate::error::{CodecError, Error, HandlerError, Result};
use crate::protocol::framing::MAX_FRAME_SIZE;
use crate::protocol::message::{METHODS_METHOD, NAME_METHOD};
use crate::protocol::{
    ErrorInfo, Frame, FrameCodec, FrameType, ReplyEnvelope, RequestEnvelope, codec,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

type SharedSink = Arc<Mutex<SplitSink<Framed<TcpStream, FrameCodec>, Frame>>>;

/// Configuration for the RPC server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum calls executing at once across all connections.
    pub pool_size: usize,
    /// Maximum frame size.
    pub max_frame_size: usize,
    /// Buffered chunks per streamed reply.
    pub stream_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            pool_size: 64,
            max_frame_size: MAX_FRAME_SIZE,
            stream_buffer: 32,
        }
    }
}

/// Response from a handler.
#[derive(Debug)]
pub enum HandlerResponse {
    /// Single response.
    Single(Bytes),
    /// Stream of responses, terminated when the sender is dropped.
    Stream(mpsc::Receiver<std::result::Result<Bytes, HandlerError>>),
}

/// Trait for handling RPC calls.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Name reported by the `_name` built-in.
    fn name(&self) -> String;

    /// Methods reported by the `_methods` built-in.
    fn methods(&self) -> Vec<String>;

    /// Handle one call.
    async fn handle_call(
        &self,
        method: &str,
        args: Vec<Bytes>,
    ) -> std::result::Result<HandlerResponse, HandlerError>;

    /// Called when a new connection is established.
    async fn on_connect(&self, _addr: SocketAddr) {}

    /// Called when a connection is closed.
    async fn on_disconnect(&self, _addr: SocketAddr) {
        // Default: do nothing
    }
}

/// RPC server that listens for incoming connections.
pub struct RpcServer<H: RpcHandler> {
    handler: Arc<H>,
    config: ServerConfig,
}

impl<H: RpcHandler> RpcServer<H> {
    /// Create a new RPC server.
    pub fn new(handler: H, config: ServerConfig) -> Self {
        Self::from_arc(Arc::new(handler), config)
    }

    /// Create a server around a handler that is shared elsewhere.
    pub const fn from_arc(handler: Arc<H>, config: ServerConfig) -> Self {
        Self { handler, config }
    }

    /// Bind and start serving in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind.
    #[instrument(skip(self))]
    pub async fn bind(self, addr: SocketAddr) -> Result<ServerHandle> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            std::io::Error::new(e.kind(), format!("Failed to bind to {addr}: {e}"))
        })?;
        let local_addr = listener.local_addr()?;

        info!("RPC server listening on {}", local_addr);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.serve(listener, shutdown.clone()));

        Ok(ServerHandle {
            local_addr,
            shutdown,
            task,
        })
    }

    async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        let connections = Arc::new(Semaphore::new(self.config.max_connections));
        let pool = Arc::new(Semaphore::new(self.config.pool_size.max(1)));

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = Arc::clone(&connections).try_acquire_owned() else {
                                warn!(
                                    "Max connections reached, rejecting connection from {}",
                                    addr
                                );
                                continue;
                            };

                            let handler = Arc::clone(&self.handler);
                            let config = self.config.clone();
                            let pool = Arc::clone(&pool);
                            let shutdown = shutdown.clone();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(
                                    stream, addr, handler, config, pool, shutdown,
                                ).await {
                                    error!("Connection error from {}: {}", addr, e);
                                }
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                () = shutdown.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }
            }
        }
    }

    /// Handle a single connection.
    #[instrument(skip(stream, handler, config, pool, shutdown))]
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<H>,
        config: ServerConfig,
        pool: Arc<Semaphore>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        debug!("New connection from {}", addr);
        stream.set_nodelay(true)?;

        handler.on_connect(addr).await;

        let framed = Framed::new(
            stream,
            FrameCodec::new().with_max_frame_size(config.max_frame_size),
        );
        let (sink, mut frames) = framed.split();
        let sink: SharedSink = Arc::new(Mutex::new(sink));

        loop {
            let next = tokio::select! {
                next = frames.next() => next,
                () = shutdown.cancelled() => {
                    let mut sink = sink.lock().await;
                    let _ = sink.send(Frame::control(FrameType::Close)).await;
                    break;
                }
            };

            match next {
                Some(Ok(frame)) => match frame.frame_type {
                    FrameType::Request => {
                        let Ok(permit) = Arc::clone(&pool).acquire_owned().await else {
                            break;
                        };
                        let handler = Arc::clone(&handler);
                        let sink = Arc::clone(&sink);

                        tokio::spawn(async move {
                            if let Err(e) = Self::handle_request(frame, handler, sink).await {
                                error!("Failed to handle request: {}", e);
                            }
                            drop(permit);
                        });
                    }
                    FrameType::Heartbeat => {
                        // Echo back heartbeat
                        let mut sink = sink.lock().await;
                        if let Err(e) = sink.send(Frame::control(FrameType::Heartbeat)).await {
                            error!("Failed to send heartbeat response: {}", e);
                            break;
                        }
                    }
                    FrameType::Close => {
                        debug!("Client requested close");
                        break;
                    }
                    other => {
                        warn!("Unexpected frame type: {:?}", other);
                    }
                },
                Some(Err(e)) => {
                    error!("Frame error from {}: {}", addr, e);
                    break;
                }
                None => {
                    debug!("Connection closed by client");
                    break;
                }
            }
        }

        handler.on_disconnect(addr).await;

        Ok(())
    }

    /// Handle a single request, from envelope to final frame.
    async fn handle_request(frame: Frame, handler: Arc<H>, sink: SharedSink) -> Result<()> {
        let RequestEnvelope { id, method, args } = bincode::deserialize(&frame.payload)
            .map_err(|e| CodecError::DeserializationFailed(e.to_string()))?;

        debug!("Request {} for method {}", id, method);

        match Self::dispatch(&handler, method, args).await {
            Ok(HandlerResponse::Single(payload)) => {
                Self::send_reply(&sink, FrameType::Reply, id, payload, None).await
            }
            Ok(HandlerResponse::Stream(mut chunks)) => {
                while let Some(chunk) = chunks.recv().await {
                    match chunk {
                        Ok(payload) => {
                            Self::send_reply(&sink, FrameType::StreamChunk, id, payload, None)
                                .await?;
                        }
                        Err(e) => {
                            debug!("Stream for request {} failed: {}", id, e);
                            let info = e.to_error_info();
                            return Self::send_reply(
                                &sink,
                                FrameType::Error,
                                id,
                                Bytes::new(),
                                Some(info),
                            )
                            .await;
                        }
                    }
                }
                Self::send_reply(&sink, FrameType::StreamEnd, id, Bytes::new(), None).await
            }
            Err(e) => {
                debug!("Request {} failed: {}", id, e);
                let info = e.to_error_info();
                Self::send_reply(&sink, FrameType::Error, id, Bytes::new(), Some(info)).await
            }
        }
    }

    /// Answer built-ins, otherwise run the handler in its own task so a
    /// panic only fails this call.
    async fn dispatch(
        handler: &Arc<H>,
        method: String,
        args: Vec<Bytes>,
    ) -> std::result::Result<HandlerResponse, HandlerError> {
        match method.as_str() {
            NAME_METHOD => return encode_builtin(&handler.name()),
            METHODS_METHOD => return encode_builtin(&handler.methods()),
            _ => {}
        }

        let handler = Arc::clone(handler);
        let task = tokio::spawn(async move { handler.handle_call(&method, args).await });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(HandlerError::Panicked(panic_message(&*e.into_panic()))),
            Err(e) => Err(HandlerError::Internal(e.to_string())),
        }
    }

    async fn send_reply(
        sink: &SharedSink,
        frame_type: FrameType,
        request_id: Uuid,
        payload: Bytes,
        error: Option<ErrorInfo>,
    ) -> Result<()> {
        let envelope = ReplyEnvelope {
            request_id,
            payload,
            error,
        };
        let bytes = bincode::serialize(&envelope)
            .map(Bytes::from)
            .map_err(CodecError::from)?;

        let mut sink = sink.lock().await;
        sink.send(Frame::new(frame_type, bytes))
            .await
            .map_err(Error::Io)
    }
}

fn encode_builtin<T: Serialize + ?Sized>(
    value: &T,
) -> std::result::Result<HandlerResponse, HandlerError> {
    codec::encode(value)
        .map(HandlerResponse::Single)
        .map_err(|e| HandlerError::Internal(e.to_string()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a running server.
///
/// Dropping the handle stops the server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the server is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections, close open ones and wait for the accept
    /// loop to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!("Server task ended abnormally: {}", e);
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
