//! Transparent remote objects over the `proven-rpc` transport.
//!
//! A server exposes a namespace of functions, generators, values and nested
//! namespaces. A client learns what each name is from the server's schema
//! and resolves members without any interface declared on its side.
//!
//! # Features
//!
//! - **Schema discovery**: `_schema` classifies every exposed name as
//!   callable, value or namespace
//! - **Typed values**: a signature-tagged serializer registry carries domain
//!   types and keeps container shapes intact
//! - **Exception fidelity**: registered exception types are raised on the
//!   client as themselves
//! - **Streaming**: generator members stream one encoded chunk per item
//!
//! # Example
//!
//! ```no_run
//! use proven_remote_object::{
//!     CallArgs, Exposed, Member, RemoteObjectClient, RemoteObjectServer, SerializerRegistry,
//!     Value,
//! };
//! use proven_rpc::ServerConfig;
//!
//! async fn example() -> proven_remote_object::Result<()> {
//!     let registry = SerializerRegistry::standard();
//!     let exposed = Exposed::mapping([
//!         ("CONST", Member::constant(42)),
//!         (
//!             "add",
//!             Member::function(|args: CallArgs| {
//!                 Ok(Value::Int(args.int(0, "a")? + args.int(1, "b")?))
//!             }),
//!         ),
//!     ]);
//!
//!     let server = RemoteObjectServer::new(exposed, registry.clone())
//!         .bind(([127, 0, 0, 1], 0).into(), ServerConfig::default())
//!         .await?;
//!
//!     let client = RemoteObjectClient::connect(server.local_addr(), registry).await?;
//!     let sum = client.call("add", CallArgs::positional([2, 3])).await?;
//!     assert_eq!(sum, Value::Int(5));
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod encoder;
pub mod error;
pub mod fanout;
pub mod hybrid;
pub mod namespace;
pub mod packages;
pub mod proxy;
pub mod schema;
pub mod serializer;
pub mod server;
pub mod value;

pub use client::{ClientConfig, Outcome, RemoteMethod, RemoteObjectClient, Resolved, ValueStream};
pub use encoder::Encoder;
pub use error::{Error, RegistryError, Result};
pub use fanout::FanoutClient;
pub use hybrid::{HybridMember, HybridNamespace};
pub use namespace::{CallResult, Exposed, Member, Namespace, SharedValue, shared_value};
pub use proxy::ProxyNamespace;
pub use schema::{Capability, MethodList, SchemaMap};
pub use serializer::{RegistryBuilder, Serializer, SerializerRegistry, priority};
pub use server::RemoteObjectServer;
pub use value::{ArgumentError, CallArgs, Exception, Object, Opaque, RemoteError, Value};
