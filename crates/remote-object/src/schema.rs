//! Capability discovery: what each exposed name is.

use crate::error::{Error, Result};
use crate::namespace::Member;

use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Built-in method returning the schema as plain strings.
pub const SCHEMA_METHOD: &str = "_schema";

/// Names answered by the server itself; never exposed as members.
pub const RESERVED_NAMES: [&str; 3] = [
    proven_rpc::NAME_METHOD,
    proven_rpc::METHODS_METHOD,
    SCHEMA_METHOD,
];

/// Whether `name` is answered without going through the encoder.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Classification of one exposed name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Invocable with arguments.
    Callable,
    /// Plain value, fetched with a zero-argument call.
    Value,
    /// Nested namespace, traversed but never called.
    Module,
}

impl Capability {
    /// Wire string for this capability.
    #[must_use]
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::Callable => "CallableT",
            Self::Value => "AnyT",
            Self::Module => "ModuleTypeT",
        }
    }

    /// Parse a wire string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for unknown strings.
    pub fn from_wire(wire: &str) -> Result<Self> {
        match wire {
            "CallableT" => Ok(Self::Callable),
            "AnyT" => Ok(Self::Value),
            "ModuleTypeT" => Ok(Self::Module),
            other => Err(Error::Protocol(format!("unknown capability '{other}'"))),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Name to capability, for every exposed name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaMap(BTreeMap<String, Capability>);

impl SchemaMap {
    /// Classify flattened members.
    #[must_use]
    pub fn from_members(members: &IndexMap<String, Member>) -> Self {
        Self(
            members
                .iter()
                .map(|(name, member)| (name.clone(), member.capability()))
                .collect(),
        )
    }

    /// Capability of `name`, if exposed.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Capability> {
        self.0.get(name).copied()
    }

    /// Number of exposed names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is exposed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Capability)> {
        self.0.iter().map(|(name, cap)| (name.as_str(), *cap))
    }

    /// Wire form: name to capability string.
    #[must_use]
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(name, cap)| (name.clone(), cap.as_wire().to_string()))
            .collect()
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if a capability string is unknown.
    pub fn from_wire(wire: BTreeMap<String, String>) -> Result<Self> {
        wire.into_iter()
            .map(|(name, cap)| Ok((name, Capability::from_wire(&cap)?)))
            .collect::<Result<_>>()
            .map(Self)
    }
}

impl FromIterator<(String, Capability)> for SchemaMap {
    fn from_iter<I: IntoIterator<Item = (String, Capability)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Names with a real wire handler: every exposed name except namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodList(BTreeSet<String>);

impl MethodList {
    /// Callable and value members of flattened members.
    #[must_use]
    pub fn from_members(members: &IndexMap<String, Member>) -> Self {
        members
            .iter()
            .filter(|(_, member)| member.capability() != Capability::Module)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether `name` has a handler.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Names as an owned vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<String> for MethodList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
