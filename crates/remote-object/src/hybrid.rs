//! A local namespace whose members may be overridden remotely.

use crate::client::{RemoteObjectClient, Resolved};
use crate::error::{Error, Result};
use crate::namespace::{Member, Namespace};

use std::fmt;
use tracing::trace;

/// Where a hybrid lookup was satisfied.
#[derive(Debug)]
pub enum HybridMember {
    /// The remote server exposes the member.
    Remote(Resolved),
    /// Only the local namespace has it.
    Local(Member),
}

/// Looks members up remotely first, under the local namespace's name, and
/// falls back to the local namespace.
#[derive(Debug, Clone)]
pub struct HybridNamespace {
    local: Namespace,
    client: RemoteObjectClient,
}

impl HybridNamespace {
    /// Pair `local` with `client`; remote names are prefixed with the local
    /// namespace name.
    #[must_use]
    pub fn new(local: Namespace, client: &RemoteObjectClient) -> Self {
        let client = client.with_prefix(local.name());
        Self { local, client }
    }

    /// Pair `local` with `client` under an explicit remote prefix.
    #[must_use]
    pub fn with_name(local: Namespace, client: &RemoteObjectClient, name: &str) -> Self {
        Self {
            local,
            client: client.with_prefix(name),
        }
    }

    /// The local namespace.
    #[must_use]
    pub const fn local(&self) -> &Namespace {
        &self.local
    }

    /// The prefixed client.
    #[must_use]
    pub const fn client(&self) -> &RemoteObjectClient {
        &self.client
    }

    /// Resolve `item`, remote side first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMember`] if neither side has the member, or
    /// any non-lookup failure from the remote side.
    pub async fn resolve(&self, item: &str) -> Result<HybridMember> {
        match self.client.resolve(item).await {
            Ok(resolved) => Ok(HybridMember::Remote(resolved)),
            Err(Error::UnknownMember(name)) => {
                trace!("{} not exposed remotely, using local member", name);
                self.local
                    .resolve(item)
                    .cloned()
                    .map(HybridMember::Local)
                    .ok_or(Error::UnknownMember(name))
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for HybridNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<HybridNamespace('{}')>",
            self.client.prefix().unwrap_or(self.local.name())
        )
    }
}
