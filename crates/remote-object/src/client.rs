//! Client side: schema discovery, member resolution and calls.
//!
//! Nothing about the remote interface is declared up front. The client asks
//! the server for its schema and method list once per connection and
//! resolves every member from that metadata.

use crate::encoder::Encoder;
use crate::error::{Error, RaisedException, Result};
use crate::proxy::ProxyNamespace;
use crate::schema::{Capability, MethodList, SCHEMA_METHOD, SchemaMap};
use crate::serializer::SerializerRegistry;
use crate::value::{CallArgs, Value};

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use proven_rpc::{
    ErrorCode, ErrorInfo, METHODS_METHOD, NAME_METHOD, RemoteErrorHook, Reply, RpcClient, codec,
};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

/// Lazily decoded chunks of a streamed reply.
pub type ValueStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Configuration for [`RemoteObjectClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-call timeout.
    pub timeout: Duration,
    /// Heartbeat interval; `None` disables liveness detection.
    pub heartbeat: Option<Duration>,
    /// Never send heartbeats.
    pub passive_heartbeat: bool,
    /// Dotted prefix every resolved name is relative to.
    pub prefix: Option<String>,
    /// Maximum frame size.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            heartbeat: Some(Duration::from_secs(5)),
            passive_heartbeat: false,
            prefix: None,
            max_frame_size: proven_rpc::protocol::framing::MAX_FRAME_SIZE,
        }
    }
}

/// What a member name resolved to.
#[derive(Debug)]
pub enum Resolved {
    /// A value member, fetched now.
    Value(Value),
    /// A callable member.
    Callable(RemoteMethod),
    /// A nested namespace.
    Namespace(ProxyNamespace),
}

impl Resolved {
    /// The fetched value, if this was a value member.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The callable, if this was a callable member.
    #[must_use]
    pub fn into_callable(self) -> Option<RemoteMethod> {
        match self {
            Self::Callable(method) => Some(method),
            _ => None,
        }
    }

    /// The namespace proxy, if this was a namespace.
    #[must_use]
    pub fn into_namespace(self) -> Option<ProxyNamespace> {
        match self {
            Self::Namespace(ns) => Some(ns),
            _ => None,
        }
    }
}

/// Reply to a call: one value, or a stream of values.
pub enum Outcome {
    /// Unary reply.
    Value(Value),
    /// Streamed reply.
    Stream(ValueStream),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Per-connection state. Bootstrap data is memoized here, so replacing the
/// session forgets it.
struct Session {
    rpc: RpcClient,
    name: OnceCell<String>,
    schema: OnceCell<Arc<SchemaMap>>,
    methods: OnceCell<Arc<MethodList>>,
}

struct Shared {
    addr: SocketAddr,
    config: ClientConfig,
    encoder: Encoder,
    session: RwLock<Arc<Session>>,
}

/// Client for a [`crate::RemoteObjectServer`].
///
/// Cheap to clone; clones share the connection and memoized schema.
#[derive(Clone)]
pub struct RemoteObjectClient {
    shared: Arc<Shared>,
    prefix: Option<Arc<str>>,
}

impl RemoteObjectClient {
    /// Connect with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`] if the connection fails.
    pub async fn connect(addr: SocketAddr, registry: Arc<SerializerRegistry>) -> Result<Self> {
        Self::connect_with(addr, registry, ClientConfig::default()).await
    }

    /// Connect with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`] if the connection fails.
    #[instrument(skip(registry, config))]
    pub async fn connect_with(
        addr: SocketAddr,
        registry: Arc<SerializerRegistry>,
        config: ClientConfig,
    ) -> Result<Self> {
        let encoder = Encoder::new(registry);
        let session = open_session(addr, &config, &encoder).await?;
        let prefix = config.prefix.as_deref().map(Arc::from);

        info!("Connected to remote objects at {}", addr);

        Ok(Self {
            shared: Arc::new(Shared {
                addr,
                config,
                encoder,
                session: RwLock::new(Arc::new(session)),
            }),
            prefix,
        })
    }

    /// A client sharing this connection whose names are relative to
    /// `prefix` (itself relative to any current prefix).
    #[must_use]
    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            prefix: Some(Arc::from(self.qualify(prefix))),
        }
    }

    /// The current prefix.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// The server address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    /// The client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// The encoder used for arguments and replies.
    #[must_use]
    pub fn encoder(&self) -> &Encoder {
        &self.shared.encoder
    }

    /// Whether the current connection is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session().rpc.is_connected()
    }

    /// Replace the connection. Memoized bootstrap data is dropped with it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connectivity`] if the new connection fails; the old
    /// one is kept in that case.
    pub async fn reconnect(&self) -> Result<()> {
        let session = open_session(self.shared.addr, &self.shared.config, &self.shared.encoder)
            .await?;
        let old = std::mem::replace(&mut *self.shared.session.write(), Arc::new(session));
        old.rpc.close().await;
        debug!("Reconnected to {}", self.shared.addr);
        Ok(())
    }

    /// Close the connection.
    pub async fn close(&self) {
        self.session().rpc.close().await;
    }

    /// The server name (`_name`), memoized per connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap call fails.
    pub async fn name(&self) -> Result<String> {
        let session = self.session();
        session
            .name
            .get_or_try_init(|| async { bootstrap::<String>(&session.rpc, NAME_METHOD).await })
            .await
            .cloned()
    }

    /// The schema (`_schema`), memoized per connection. Concurrent first
    /// calls share one round trip.
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap call fails or the schema is
    /// malformed.
    pub async fn schema(&self) -> Result<Arc<SchemaMap>> {
        let session = self.session();
        session
            .schema
            .get_or_try_init(|| async {
                let wire: BTreeMap<String, String> =
                    bootstrap(&session.rpc, SCHEMA_METHOD).await?;
                SchemaMap::from_wire(wire).map(Arc::new)
            })
            .await
            .cloned()
    }

    /// The method list (`_methods`), memoized per connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap call fails.
    pub async fn methods(&self) -> Result<Arc<MethodList>> {
        let session = self.session();
        session
            .methods
            .get_or_try_init(|| async {
                let names: Vec<String> = bootstrap(&session.rpc, METHODS_METHOD).await?;
                Ok(Arc::new(names.into_iter().collect()))
            })
            .await
            .cloned()
    }

    /// Resolve a member relative to the current prefix.
    ///
    /// Values are fetched immediately and never cached; namespaces become a
    /// [`ProxyNamespace`]; callables must be in the method list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMember`] if the name is not exposed, or the
    /// error of the value fetch.
    pub async fn resolve(&self, item: &str) -> Result<Resolved> {
        self.resolve_qualified(self.qualify(item)).await
    }

    /// Call a member and wait for its whole reply. Streamed replies are
    /// collected into a list.
    ///
    /// # Errors
    ///
    /// Returns the remote exception, a connectivity error, or a protocol
    /// error.
    pub async fn call(&self, method: &str, args: CallArgs) -> Result<Value> {
        self.call_qualified(&self.qualify(method), args).await
    }

    /// Call a member and consume its reply as a stream. A unary reply
    /// yields one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails before the first item.
    pub async fn call_stream(&self, method: &str, args: CallArgs) -> Result<ValueStream> {
        self.stream_qualified(&self.qualify(method), args).await
    }

    /// Call a member and return its reply as sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails before the first reply event.
    pub async fn invoke(&self, method: &str, args: CallArgs) -> Result<Outcome> {
        self.invoke_qualified(&self.qualify(method), args).await
    }

    pub(crate) async fn resolve_qualified(&self, name: String) -> Result<Resolved> {
        let schema = self.schema().await?;

        match schema.get(&name) {
            Some(Capability::Value) => {
                let value = self.call_qualified(&name, CallArgs::new()).await?;
                Ok(Resolved::Value(value))
            }
            Some(Capability::Module) => Ok(Resolved::Namespace(ProxyNamespace::new(
                self.unprefixed(),
                name,
            ))),
            Some(Capability::Callable) | None => {
                if self.methods().await?.contains(&name) {
                    Ok(Resolved::Callable(RemoteMethod {
                        client: self.unprefixed(),
                        name,
                    }))
                } else {
                    Err(Error::UnknownMember(name))
                }
            }
        }
    }

    pub(crate) async fn call_qualified(&self, name: &str, args: CallArgs) -> Result<Value> {
        match self.invoke_qualified(name, args).await? {
            Outcome::Value(value) => Ok(value),
            Outcome::Stream(stream) => stream.try_collect::<Vec<_>>().await.map(Value::List),
        }
    }

    pub(crate) async fn stream_qualified(&self, name: &str, args: CallArgs) -> Result<ValueStream> {
        match self.invoke_qualified(name, args).await? {
            Outcome::Value(value) => Ok(stream::once(async move { Ok(value) }).boxed()),
            Outcome::Stream(stream) => Ok(stream),
        }
    }

    #[instrument(skip(self, args), fields(args = args.args.len() + args.kwargs.len()))]
    pub(crate) async fn invoke_qualified(&self, name: &str, args: CallArgs) -> Result<Outcome> {
        // Bootstrap names are answered from the memoized plain-CBOR replies
        match name {
            NAME_METHOD => return Ok(Outcome::Value(Value::Str(self.name().await?))),
            METHODS_METHOD => {
                let methods = self.methods().await?;
                return Ok(Outcome::Value(methods.iter().map(Value::from).collect()));
            }
            SCHEMA_METHOD => {
                let schema = self.schema().await?;
                return Ok(Outcome::Value(Value::map(
                    schema.iter().map(|(name, cap)| (name, cap.as_wire())),
                )));
            }
            _ => {}
        }

        let encoder = &self.shared.encoder;
        let wire = encoder.encode(&args)?;
        let session = self.session();

        match session.rpc.call(name, wire).await? {
            Reply::Single(bytes) => Ok(Outcome::Value(encoder.decode_value(&bytes)?)),
            Reply::Stream(chunks) => {
                let encoder = encoder.clone();
                Ok(Outcome::Stream(
                    chunks
                        .map(move |chunk| encoder.decode_value(&chunk?))
                        .boxed(),
                ))
            }
        }
    }

    fn session(&self) -> Arc<Session> {
        Arc::clone(&self.shared.session.read())
    }

    fn qualify(&self, item: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{item}"),
            None => item.to_string(),
        }
    }

    fn unprefixed(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            prefix: None,
        }
    }
}

impl fmt::Debug for RemoteObjectClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObjectClient")
            .field("addr", &self.shared.addr)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RemoteObjectClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "<RemoteObjectClient('{}', '{prefix}')>", self.shared.addr),
            None => write!(f, "<RemoteObjectClient('{}')>", self.shared.addr),
        }
    }
}

/// A callable remote member.
#[derive(Debug, Clone)]
pub struct RemoteMethod {
    client: RemoteObjectClient,
    name: String,
}

impl RemoteMethod {
    /// Full dotted name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call and wait for the whole reply.
    ///
    /// # Errors
    ///
    /// Returns the remote exception, a connectivity error, or a protocol
    /// error.
    pub async fn call(&self, args: CallArgs) -> Result<Value> {
        self.client.call_qualified(&self.name, args).await
    }

    /// Call and consume the reply as a stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails before the first item.
    pub async fn call_stream(&self, args: CallArgs) -> Result<ValueStream> {
        self.client.stream_qualified(&self.name, args).await
    }
}

impl fmt::Display for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<RemoteMethod('{}')>", self.name)
    }
}

async fn open_session(
    addr: SocketAddr,
    config: &ClientConfig,
    encoder: &Encoder,
) -> Result<Session> {
    let rpc_config = proven_rpc::ClientConfig {
        timeout: config.timeout,
        heartbeat: config.heartbeat,
        passive_heartbeat: config.passive_heartbeat,
        max_frame_size: config.max_frame_size,
        ..proven_rpc::ClientConfig::default()
    };

    let rpc = RpcClient::builder()
        .addr(addr)
        .config(rpc_config)
        .on_remote_error(remote_error_hook(encoder.clone()))
        .connect()
        .await?;

    Ok(Session {
        rpc,
        name: OnceCell::new(),
        schema: OnceCell::new(),
        methods: OnceCell::new(),
    })
}

/// Rebuild application errors as the exceptions they were raised as.
fn remote_error_hook(encoder: Encoder) -> RemoteErrorHook {
    Arc::new(move |info: ErrorInfo| match info.code {
        ErrorCode::Application => {
            let exception = encoder.decode_fault(&info.message, info.payload.as_deref());
            proven_rpc::Error::Application(Box::new(RaisedException(exception)))
        }
        _ => proven_rpc::Error::Remote(info),
    })
}

/// Call a built-in and decode its plain-CBOR reply.
async fn bootstrap<T: serde::de::DeserializeOwned>(rpc: &RpcClient, method: &str) -> Result<T> {
    debug!("Fetching {}", method);
    let bytes = match rpc.call(method, Vec::new()).await? {
        Reply::Single(bytes) => bytes,
        Reply::Stream(_) => {
            return Err(Error::Protocol(format!("{method} replied with a stream")));
        }
    };
    decode_plain(&bytes)
}

fn decode_plain<T: serde::de::DeserializeOwned>(bytes: &Bytes) -> Result<T> {
    codec::decode(bytes).map_err(|e| Error::Protocol(e.to_string()))
}
