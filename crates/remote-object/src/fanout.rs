//! One call, several servers.

use crate::client::{ClientConfig, RemoteObjectClient};
use crate::error::{Error, Result};
use crate::serializer::SerializerRegistry;
use crate::value::{CallArgs, Value};

use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Routes each call to every connected server exposing the method.
#[derive(Debug, Clone)]
pub struct FanoutClient {
    clients: Vec<RemoteObjectClient>,
    routes: BTreeMap<String, Vec<usize>>,
}

impl FanoutClient {
    /// Connect to every target and learn which methods each exposes.
    ///
    /// # Errors
    ///
    /// Fails if any target cannot be connected or bootstrapped.
    #[instrument(skip_all)]
    pub async fn connect(
        targets: impl IntoIterator<Item = SocketAddr>,
        registry: Arc<SerializerRegistry>,
        config: ClientConfig,
    ) -> Result<Self> {
        let mut clients = Vec::new();
        let mut routes: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for (index, addr) in targets.into_iter().enumerate() {
            let client =
                RemoteObjectClient::connect_with(addr, Arc::clone(&registry), config.clone())
                    .await?;
            for method in client.methods().await?.iter() {
                routes.entry(method.to_string()).or_default().push(index);
            }
            clients.push(client);
        }

        debug!(
            "Fanout over {} servers, {} distinct methods",
            clients.len(),
            routes.len()
        );

        Ok(Self { clients, routes })
    }

    /// Connected clients, in target order.
    #[must_use]
    pub fn clients(&self) -> &[RemoteObjectClient] {
        &self.clients
    }

    /// Every method exposed by at least one server.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Addresses of the servers exposing `method`.
    #[must_use]
    pub fn targets(&self, method: &str) -> Vec<SocketAddr> {
        self.routes
            .get(method)
            .map(|indices| indices.iter().map(|&i| self.clients[i].addr()).collect())
            .unwrap_or_default()
    }

    /// Call `method` on every server exposing it.
    ///
    /// One server gives its value; several give a tuple of their values in
    /// target order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMember`] if no server exposes the method, or
    /// the first failure among the calls.
    pub async fn call(&self, method: &str, args: CallArgs) -> Result<Value> {
        let indices = self
            .routes
            .get(method)
            .filter(|indices| !indices.is_empty())
            .ok_or_else(|| Error::UnknownMember(method.to_string()))?;

        let mut values = try_join_all(
            indices
                .iter()
                .map(|&i| self.clients[i].call(method, args.clone())),
        )
        .await?;

        if values.len() == 1 {
            Ok(values.remove(0))
        } else {
            Ok(Value::Tuple(values))
        }
    }

    /// Close every connection.
    pub async fn close(&self) {
        for client in &self.clients {
            client.close().await;
        }
    }
}
