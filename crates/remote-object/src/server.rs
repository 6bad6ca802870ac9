//! Serving a namespace as remote objects.

use crate::encoder::Encoder;
use crate::error::Result;
use crate::namespace::{Exposed, GeneratorFn, Member, flatten};
use crate::schema::{Capability, MethodList, SCHEMA_METHOD, SchemaMap};
use crate::serializer::SerializerRegistry;
use crate::value::{ArgumentError, CallArgs, Exception, Value};

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use proven_rpc::{HandlerError, HandlerResponse, RpcHandler, RpcServer, ServerConfig, ServerHandle};
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};

/// Name reported by `_name` when the exposed members have no display name.
pub const DEFAULT_SERVER_NAME: &str = "remote-object";

/// Serves flattened members over the RPC transport.
///
/// Schema and method list are computed once here and never change.
pub struct RemoteObjectServer {
    name: String,
    members: IndexMap<String, Member>,
    schema: SchemaMap,
    methods: MethodList,
    encoder: Encoder,
    stream_buffer: usize,
}

impl RemoteObjectServer {
    /// Flatten and classify `exposed`.
    pub fn new(exposed: impl Into<Exposed>, registry: Arc<SerializerRegistry>) -> Self {
        let exposed = exposed.into();
        let name = exposed
            .display_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_SERVER_NAME)
            .to_string();

        let members = flatten(&exposed);
        let schema = SchemaMap::from_members(&members);
        let methods = MethodList::from_members(&members);

        debug!(
            "Server {} exposes {} members, {} with handlers",
            name,
            schema.len(),
            methods.len()
        );

        Self {
            name,
            members,
            schema,
            methods,
            encoder: Encoder::new(registry),
            stream_buffer: 32,
        }
    }

    /// Override the name reported by `_name`.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Chunks buffered per streamed reply before the generator waits.
    #[must_use]
    pub fn with_stream_buffer(mut self, chunks: usize) -> Self {
        self.stream_buffer = chunks.max(1);
        self
    }

    /// The reported name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The capability of every exposed name.
    #[must_use]
    pub const fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    /// Names with a wire handler.
    #[must_use]
    pub const fn method_list(&self) -> &MethodList {
        &self.methods
    }

    /// The encoder used for arguments and replies.
    #[must_use]
    pub const fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Bind to `addr` and serve in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(self, addr: SocketAddr, config: ServerConfig) -> Result<ServerHandle> {
        let name = self.name.clone();
        let handle = RpcServer::new(self, config).bind(addr).await?;
        info!("Serving {} on {}", name, handle.local_addr());
        Ok(handle)
    }

    fn encode_reply(&self, value: &Value) -> std::result::Result<HandlerResponse, HandlerError> {
        self.encoder
            .encode_value(value)
            .map(HandlerResponse::Single)
            .map_err(|e| HandlerError::Internal(e.to_string()))
    }

    /// Run a generator on a blocking thread, one encoded chunk per item.
    fn stream(&self, call: CallArgs, generator: Arc<GeneratorFn>) -> HandlerResponse {
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let encoder = self.encoder.clone();

        tokio::task::spawn_blocking(move || {
            let mut items = match generator(call) {
                Ok(items) => items,
                Err(exception) => {
                    let _ = tx.blocking_send(Err(fault(&encoder, &exception)));
                    return;
                }
            };

            loop {
                let chunk = match catch_unwind(AssertUnwindSafe(|| items.next())) {
                    Ok(None) => break,
                    Ok(Some(Ok(value))) => encoder
                        .encode_value(&value)
                        .map_err(|e| HandlerError::Internal(e.to_string())),
                    Ok(Some(Err(exception))) => Err(fault(&encoder, &exception)),
                    Err(_) => Err(HandlerError::Panicked("generator panicked".to_string())),
                };

                let last = chunk.is_err();
                if tx.blocking_send(chunk).is_err() {
                    debug!("Stream consumer went away, stopping generator");
                    break;
                }
                if last {
                    break;
                }
            }
        });

        HandlerResponse::Stream(rx)
    }
}

/// Convert a raised exception into an error reply carrying the encoded
/// exception.
fn fault(encoder: &Encoder, exception: &Exception) -> HandlerError {
    let (message, payload) = encoder.encode_fault(exception);
    HandlerError::Application { message, payload }
}

/// Re-raise a panic from a blocking handler so the transport reports it.
fn join_failure(e: JoinError) -> HandlerError {
    if e.is_panic() {
        std::panic::resume_unwind(e.into_panic());
    }
    HandlerError::Internal(e.to_string())
}

#[async_trait]
impl RpcHandler for RemoteObjectServer {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn methods(&self) -> Vec<String> {
        self.methods.to_vec()
    }

    #[instrument(skip(self, args), fields(args = args.len()))]
    async fn handle_call(
        &self,
        method: &str,
        args: Vec<Bytes>,
    ) -> std::result::Result<HandlerResponse, HandlerError> {
        if method == SCHEMA_METHOD {
            return proven_rpc::codec::encode(&self.schema.to_wire())
                .map(HandlerResponse::Single)
                .map_err(|e| HandlerError::Internal(e.to_string()));
        }

        let member = self
            .members
            .get(method)
            .filter(|member| member.capability() != Capability::Module)
            .ok_or_else(|| HandlerError::NotFound(method.to_string()))?;

        let call = self.encoder.decode(&args).map_err(|e| {
            warn!("Undecodable arguments for {}: {}", method, e);
            HandlerError::InvalidArguments(e.to_string())
        })?;

        match member {
            Member::Function(f) => {
                let f = Arc::clone(f);
                let result = tokio::task::spawn_blocking(move || f(call))
                    .await
                    .map_err(join_failure)?;
                match result {
                    Ok(value) => self.encode_reply(&value),
                    Err(exception) => {
                        debug!("{} raised {:?}", method, exception);
                        Err(fault(&self.encoder, &exception))
                    }
                }
            }
            Member::Value(get) => {
                if !call.is_empty() {
                    let exception = Exception::from(ArgumentError(format!(
                        "'{method}' is a value and takes no arguments"
                    )));
                    return Err(fault(&self.encoder, &exception));
                }
                self.encode_reply(&get())
            }
            Member::Generator(generator) => Ok(self.stream(call, Arc::clone(generator))),
            Member::Namespace(_) => Err(HandlerError::NotFound(method.to_string())),
        }
    }
}
