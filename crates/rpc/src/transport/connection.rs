//! Client connection management.
//!
//! A [`Connection`] owns one TCP stream to a server. Writes go through a
//! mutex-guarded sink so concurrent calls never interleave frames; a reader
//! task routes every reply frame to the caller waiting on its request id.

use crate::error::{ConnectionError, Error, Result};
use crate::protocol::{ErrorCode, ErrorInfo, Frame, FrameCodec, FrameType, ReplyEnvelope};
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tokio_util::codec::Framed;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, Frame>;
type FrameStream = SplitStream<Framed<TcpStream, FrameCodec>>;

/// One reply event routed to a waiting caller.
#[derive(Debug)]
pub(crate) enum ReplyEvent {
    /// Unary reply.
    Single(Bytes),
    /// One streamed chunk.
    Chunk(Bytes),
    /// End of a streamed reply.
    End,
    /// Error reply.
    Failed(ErrorInfo),
}

/// Sender half registered for each in-flight request.
pub(crate) type EventSender = mpsc::Sender<Result<ReplyEvent>>;

/// Health status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// Connection is usable.
    Healthy,
    /// The peer closed the connection or the stream failed.
    Closed,
    /// Nothing arrived within the silence limit.
    Lost(Duration),
}

impl ConnectionHealth {
    fn to_error(self) -> Error {
        match self {
            Self::Healthy | Self::Closed => ConnectionError::Closed.into(),
            Self::Lost(silence) => ConnectionError::Lost(silence).into(),
        }
    }
}

/// Settings the connection needs from the client configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub heartbeat: Option<Duration>,
    pub passive_heartbeat: bool,
    pub max_frame_size: usize,
}

/// A single multiplexed connection to a server.
pub struct Connection {
    addr: SocketAddr,
    sink: Arc<Mutex<FrameSink>>,
    pending: Arc<DashMap<Uuid, EventSender>>,
    health: Arc<RwLock<ConnectionHealth>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Connect and start the reader (and, unless passive, heartbeat) tasks.
    pub(crate) async fn open(addr: SocketAddr, settings: ConnectionSettings) -> Result<Self> {
        let stream = timeout(settings.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(settings.connect_timeout))?
            .map_err(|source| ConnectionError::ConnectFailed { addr, source })?;
        stream.set_nodelay(true)?;

        let framed = Framed::new(
            stream,
            FrameCodec::new().with_max_frame_size(settings.max_frame_size),
        );
        let (sink, frames) = framed.split();

        let sink = Arc::new(Mutex::new(sink));
        let pending = Arc::new(DashMap::new());
        let health = Arc::new(RwLock::new(ConnectionHealth::Healthy));

        // Active heartbeats make silence meaningful; passive clients never
        // declare a connection lost on their own.
        let active_heartbeat = settings.heartbeat.filter(|_| !settings.passive_heartbeat);
        let silence_limit = active_heartbeat.map(|every| every * 2);

        let mut tasks = Vec::with_capacity(2);
        tasks.push(tokio::spawn(Self::read_loop(
            frames,
            Arc::clone(&pending),
            Arc::clone(&health),
            silence_limit,
        )));

        if let Some(every) = active_heartbeat {
            tasks.push(tokio::spawn(Self::heartbeat_loop(Arc::clone(&sink), every)));
        }

        debug!("Connected to {}", addr);

        Ok(Self {
            addr,
            sink,
            pending,
            health,
            tasks,
        })
    }

    /// The server address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current health of the connection.
    #[must_use]
    pub fn health(&self) -> ConnectionHealth {
        *self.health.read()
    }

    /// Number of requests waiting for a reply.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.pending.len()
    }

    /// Register a request id; replies for it are routed to `sender`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is no longer healthy.
    pub(crate) fn register(&self, id: Uuid, sender: EventSender) -> Result<()> {
        self.pending.insert(id, sender);

        // Checked after the insert so the reader either sees this entry when
        // it drains, or we see its final health here.
        let health = self.health();
        if health != ConnectionHealth::Healthy {
            self.pending.remove(&id);
            return Err(health.to_error());
        }

        Ok(())
    }

    /// Forget a request id (timeout or caller gone).
    pub(crate) fn forget(&self, id: &Uuid) {
        self.pending.remove(id);
    }

    /// Handle on the pending table, for streams that outlive the call.
    pub(crate) fn pending(&self) -> Arc<DashMap<Uuid, EventSender>> {
        Arc::clone(&self.pending)
    }

    /// Send a frame through this connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub(crate) async fn send_frame(&self, frame: Frame) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(frame).await.map_err(Error::Io)
    }

    /// Tell the server we are leaving and stop background tasks.
    pub async fn close(&self) {
        if self.health() == ConnectionHealth::Healthy {
            if let Err(e) = self.send_frame(Frame::control(FrameType::Close)).await {
                debug!("Failed to send close frame to {}: {}", self.addr, e);
            }
        }
        for task in &self.tasks {
            task.abort();
        }
        *self.health.write() = ConnectionHealth::Closed;
        Self::fail_pending(&self.pending, ConnectionHealth::Closed);
    }

    /// Route incoming frames until the stream ends, fails or falls silent.
    async fn read_loop(
        mut frames: FrameStream,
        pending: Arc<DashMap<Uuid, EventSender>>,
        health: Arc<RwLock<ConnectionHealth>>,
        silence_limit: Option<Duration>,
    ) {
        let mut outcome = ConnectionHealth::Closed;

        loop {
            let next = match silence_limit {
                Some(limit) => {
                    if let Ok(next) = timeout(limit, frames.next()).await {
                        next
                    } else {
                        warn!("No traffic for {:?}, declaring connection lost", limit);
                        outcome = ConnectionHealth::Lost(limit);
                        break;
                    }
                }
                None => frames.next().await,
            };

            match next {
                Some(Ok(frame)) => {
                    if !Self::dispatch(frame, &pending) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Stream error: {}", e);
                    break;
                }
                None => {
                    debug!("Stream closed");
                    break;
                }
            }
        }

        *health.write() = outcome;
        Self::fail_pending(&pending, outcome);
    }

    /// Route one frame. Returns `false` when the server asked to close.
    ///
    /// Never waits on a caller: a stream whose reader stops consuming is
    /// failed on its own while other replies keep flowing.
    fn dispatch(frame: Frame, pending: &DashMap<Uuid, EventSender>) -> bool {
        match frame.frame_type {
            FrameType::Reply | FrameType::StreamChunk | FrameType::StreamEnd | FrameType::Error => {
                let envelope: ReplyEnvelope = match bincode::deserialize(&frame.payload) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        error!("Failed to decode reply envelope: {}", e);
                        return true;
                    }
                };

                let event = match (frame.frame_type, envelope.error) {
                    (_, Some(info)) => ReplyEvent::Failed(info),
                    (FrameType::Reply, None) => ReplyEvent::Single(envelope.payload),
                    (FrameType::StreamChunk, None) => ReplyEvent::Chunk(envelope.payload),
                    (FrameType::StreamEnd, None) => ReplyEvent::End,
                    (_, None) => ReplyEvent::Failed(ErrorInfo {
                        code: ErrorCode::Internal,
                        message: "error frame without details".to_string(),
                        payload: None,
                    }),
                };

                let id = envelope.request_id;
                if matches!(event, ReplyEvent::Chunk(_)) {
                    Self::deliver_chunk(id, event, pending);
                } else {
                    match pending.remove(&id) {
                        Some((_, sender)) => {
                            if sender.try_send(Ok(event)).is_err() {
                                debug!("Caller for request {} went away", id);
                            }
                        }
                        None => warn!("Received reply for unknown request: {}", id),
                    }
                }
                true
            }
            FrameType::Heartbeat => {
                trace!("Heartbeat acknowledged");
                true
            }
            FrameType::Close => {
                debug!("Server closed the connection");
                false
            }
            FrameType::Request => {
                warn!("Unexpected request frame on a client connection");
                true
            }
        }
    }

    /// Queue one stream chunk, or fail the stream if its buffer is full.
    ///
    /// The last slot of every channel is kept for the overflow error, so
    /// terminal events after a chunk always fit.
    fn deliver_chunk(id: Uuid, event: ReplyEvent, pending: &DashMap<Uuid, EventSender>) {
        let Some(sender) = pending.get(&id).map(|entry| entry.value().clone()) else {
            debug!("Dropping chunk for unknown request: {}", id);
            return;
        };

        if sender.capacity() > 1 {
            if sender.try_send(Ok(event)).is_err() {
                debug!("Caller for request {} went away", id);
                pending.remove(&id);
            }
            return;
        }

        let unread = sender.max_capacity().saturating_sub(1);
        warn!("Request {} left {} chunks unread, dropping its stream", id, unread);
        pending.remove(&id);
        let _ = sender.try_send(Err(Error::StreamOverflow(unread)));
    }

    async fn heartbeat_loop(sink: Arc<Mutex<FrameSink>>, every: Duration) {
        let mut ticker = interval(every);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let result = {
                let mut sink = sink.lock().await;
                sink.send(Frame::control(FrameType::Heartbeat)).await
            };
            if let Err(e) = result {
                warn!("Failed to send heartbeat: {}", e);
                break;
            }
        }
    }

    fn fail_pending(pending: &DashMap<Uuid, EventSender>, health: ConnectionHealth) {
        let ids: Vec<Uuid> = pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, sender)) = pending.remove(&id) {
                // A full channel means the caller is behind on a stream; it
                // sees the closed channel once it catches up.
                let _ = sender.try_send(Err(health.to_error()));
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
