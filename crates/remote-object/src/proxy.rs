//! Client-side stand-in for a remote nested namespace.

use crate::client::{RemoteObjectClient, Resolved, ValueStream};
use crate::error::Result;
use crate::value::{CallArgs, Value};

use std::fmt;

/// A remote namespace. Member lookups resolve `prefix.sub` through the
/// client; nothing is cached here.
#[derive(Debug, Clone)]
pub struct ProxyNamespace {
    client: RemoteObjectClient,
    prefix: String,
}

impl ProxyNamespace {
    pub(crate) fn new(client: RemoteObjectClient, prefix: String) -> Self {
        Self { client, prefix }
    }

    /// Dotted name of this namespace.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.prefix
    }

    /// Resolve a member of this namespace.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteObjectClient::resolve`].
    pub async fn resolve(&self, sub: &str) -> Result<Resolved> {
        self.client.resolve_qualified(self.child(sub)).await
    }

    /// Call a member of this namespace by name.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteObjectClient::call`].
    pub async fn call(&self, sub: &str, args: CallArgs) -> Result<Value> {
        self.client.call_qualified(&self.child(sub), args).await
    }

    /// Call a member of this namespace and consume the reply as a stream.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteObjectClient::call_stream`].
    pub async fn call_stream(&self, sub: &str, args: CallArgs) -> Result<ValueStream> {
        self.client.stream_qualified(&self.child(sub), args).await
    }

    /// A proxy for `prefix.sub` without checking the schema.
    #[must_use]
    pub fn namespace(&self, sub: &str) -> Self {
        Self::new(self.client.clone(), self.child(sub))
    }

    fn child(&self, sub: &str) -> String {
        format!("{}.{sub}", self.prefix)
    }
}

impl fmt::Display for ProxyNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ProxyNamespace('{}')>", self.prefix)
    }
}
