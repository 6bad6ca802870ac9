//! Signature-tagged leaf serializers and the recursive encoded tree.
//!
//! A [`SerializerRegistry`] holds leaf codecs ordered by explicit priority.
//! Encoding walks a [`Value`] tree: containers keep their kind and recurse,
//! every other leaf goes to the first serializer that claims it and becomes
//! an [`Encoded::Leaf`] tagged with that serializer's signature. The
//! catch-all [`FallbackSerializer`] is always present and always consulted
//! last, so encoding only fails when a claiming serializer itself fails.

mod builtin;
mod typed;

pub use builtin::{BasicSerializer, ErrorSerializer, FallbackSerializer};
pub use typed::{ExceptionSerializer, TypedSerializer};

use crate::error::{Error, RegistryError, Result};
use crate::value::{ArgumentError, ObjectValue, Value};

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Signature of the basic primitive serializer.
pub const BASIC_SIGNATURE: &str = "_b";

/// Signature of the generic, message-only exception serializer.
pub const ERROR_SIGNATURE: &str = "_e";

/// Signature of the catch-all serializer.
pub const FALLBACK_SIGNATURE: &str = "_f";

/// Conventional priorities. Higher claims first; equal priorities are
/// ordered by signature.
pub mod priority {
    /// Primitive values.
    pub const BASIC: i32 = 100;
    /// Concrete exception types.
    pub const EXCEPTION: i32 = 50;
    /// Domain objects.
    pub const OBJECT: i32 = 0;
    /// Any exception, message only.
    pub const GENERIC_ERROR: i32 = -100;
}

/// A leaf-value codec.
pub trait Serializer: Send + Sync + 'static {
    /// Wire discriminator; unique within a registry.
    fn signature(&self) -> &str;

    /// Whether this serializer handles `value`.
    fn claims(&self, value: &Value) -> bool;

    /// Serialize a claimed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the value cannot be serialized.
    fn serialize(&self, value: &Value) -> Result<Bytes>;

    /// Deserialize a payload produced by [`Serializer::serialize`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the payload is malformed.
    fn deserialize(&self, payload: &[u8]) -> Result<Value>;
}

/// Wire form of a value tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoded {
    /// One leaf value, tagged with the serializer that produced it.
    Leaf {
        /// Serializer signature.
        signature: String,
        /// Serializer-specific payload.
        payload: Bytes,
    },
    /// List elements.
    List(Vec<Encoded>),
    /// Tuple elements.
    Tuple(Vec<Encoded>),
    /// Set elements.
    Set(Vec<Encoded>),
    /// Map entries.
    Map(Vec<(Encoded, Encoded)>),
}

impl Encoded {
    /// Serialize the tree for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if CBOR serialization fails.
    pub fn to_bytes(&self) -> Result<Bytes> {
        to_cbor(self)
    }

    /// Parse a tree from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the bytes are not an encoded tree.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }
}

struct Entry {
    priority: i32,
    serializer: Arc<dyn Serializer>,
}

/// Builder for a [`SerializerRegistry`].
pub struct RegistryBuilder {
    entries: Vec<Entry>,
}

impl RegistryBuilder {
    /// A builder with only the catch-all serializer.
    #[must_use]
    pub const fn bare() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// A builder with the built-in serializers: primitives, argument
    /// errors and generic exceptions.
    #[must_use]
    pub fn new() -> Self {
        let mut builder = Self::bare();
        builder.entries.push(Entry {
            priority: priority::BASIC,
            serializer: Arc::new(BasicSerializer),
        });
        builder.entries.push(Entry {
            priority: priority::EXCEPTION,
            serializer: Arc::new(ExceptionSerializer::<ArgumentError>::new("ArgumentError")),
        });
        builder.entries.push(Entry {
            priority: priority::GENERIC_ERROR,
            serializer: Arc::new(ErrorSerializer),
        });
        builder
    }

    /// Register a serializer with an explicit priority.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is taken or reserved.
    pub fn register<S: Serializer>(&mut self, priority: i32, serializer: S) -> Result<&mut Self> {
        let signature = serializer.signature();
        if signature == FALLBACK_SIGNATURE {
            return Err(RegistryError::ReservedSignature(signature.to_string()).into());
        }
        if self
            .entries
            .iter()
            .any(|entry| entry.serializer.signature() == signature)
        {
            return Err(RegistryError::DuplicateSignature(signature.to_string()).into());
        }

        self.entries.push(Entry {
            priority,
            serializer: Arc::new(serializer),
        });
        Ok(self)
    }

    /// Register a domain type under `signature`.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is taken or reserved.
    pub fn register_type<T>(&mut self, signature: &str) -> Result<&mut Self>
    where
        T: ObjectValue + Serialize + DeserializeOwned,
    {
        self.register(priority::OBJECT, TypedSerializer::<T>::new(signature))
    }

    /// Register an exception type under `signature` so it round-trips as
    /// itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is taken or reserved.
    pub fn register_exception<E>(&mut self, signature: &str) -> Result<&mut Self>
    where
        E: std::error::Error + Send + Sync + Serialize + DeserializeOwned + 'static,
    {
        self.register(priority::EXCEPTION, ExceptionSerializer::<E>::new(signature))
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(mut self) -> Arc<SerializerRegistry> {
        self.entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.serializer.signature().cmp(b.serializer.signature()))
        });

        let fallback: Arc<dyn Serializer> = Arc::new(FallbackSerializer);
        let mut by_signature: HashMap<String, Arc<dyn Serializer>> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.serializer.signature().to_string(),
                    Arc::clone(&entry.serializer),
                )
            })
            .collect();
        by_signature.insert(FALLBACK_SIGNATURE.to_string(), Arc::clone(&fallback));

        Arc::new(SerializerRegistry {
            ordered: self.entries,
            by_signature,
            fallback,
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable, ordered set of leaf serializers.
pub struct SerializerRegistry {
    ordered: Vec<Entry>,
    by_signature: HashMap<String, Arc<dyn Serializer>>,
    fallback: Arc<dyn Serializer>,
}

impl SerializerRegistry {
    /// Start building a registry with the built-in serializers.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// A registry with only the built-in serializers.
    #[must_use]
    pub fn standard() -> Arc<Self> {
        RegistryBuilder::new().build()
    }

    /// Signatures in claim order, catch-all last.
    #[must_use]
    pub fn signatures(&self) -> Vec<&str> {
        self.ordered
            .iter()
            .map(|entry| entry.serializer.signature())
            .chain(std::iter::once(self.fallback.signature()))
            .collect()
    }

    /// The serializer that handles `value`.
    #[must_use]
    pub fn claim(&self, value: &Value) -> &dyn Serializer {
        self.ordered
            .iter()
            .find(|entry| entry.serializer.claims(value))
            .map_or(&*self.fallback, |entry| &*entry.serializer)
    }

    /// The serializer registered under `signature`.
    #[must_use]
    pub fn lookup(&self, signature: &str) -> Option<&dyn Serializer> {
        self.by_signature.get(signature).map(|s| &**s)
    }

    /// Encode a value tree, preserving container kinds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if a leaf cannot be serialized.
    pub fn encode(&self, value: &Value) -> Result<Encoded> {
        let encode_all = |items: &[Value]| -> Result<Vec<Encoded>> {
            items.iter().map(|item| self.encode(item)).collect()
        };

        Ok(match value {
            Value::List(items) => Encoded::List(encode_all(items)?),
            Value::Tuple(items) => Encoded::Tuple(encode_all(items)?),
            Value::Set(items) => Encoded::Set(encode_all(items)?),
            Value::Map(entries) => Encoded::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((self.encode(k)?, self.encode(v)?)))
                    .collect::<Result<_>>()?,
            ),
            leaf => {
                let serializer = self.claim(leaf);
                Encoded::Leaf {
                    signature: serializer.signature().to_string(),
                    payload: serializer.serialize(leaf)?,
                }
            }
        })
    }

    /// Decode a value tree. Fails as a whole if any leaf fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for unknown signatures or malformed
    /// payloads.
    pub fn decode(&self, encoded: &Encoded) -> Result<Value> {
        let decode_all = |items: &[Encoded]| -> Result<Vec<Value>> {
            items.iter().map(|item| self.decode(item)).collect()
        };

        Ok(match encoded {
            Encoded::List(items) => Value::List(decode_all(items)?),
            Encoded::Tuple(items) => Value::Tuple(decode_all(items)?),
            Encoded::Set(items) => Value::set(decode_all(items)?),
            Encoded::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((self.decode(k)?, self.decode(v)?)))
                    .collect::<Result<_>>()?,
            ),
            Encoded::Leaf { signature, payload } => self
                .lookup(signature)
                .ok_or_else(|| {
                    Error::Protocol(format!("unknown serializer signature '{signature}'"))
                })?
                .deserialize(payload)?,
        })
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("signatures", &self.signatures())
            .finish()
    }
}

/// CBOR-encode a serializer payload.
pub(crate) fn to_cbor<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    proven_rpc::codec::encode(value).map_err(|e| Error::Encoding(e.to_string()))
}

/// CBOR-decode a serializer payload.
pub(crate) fn from_cbor<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    proven_rpc::codec::decode(payload).map_err(|e| Error::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Opaque, RemoteError};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Celsius(f64);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
    #[error("{0}")]
    struct ValueError(String);

    fn registry() -> Arc<SerializerRegistry> {
        let mut builder = SerializerRegistry::builder();
        builder
            .register_type::<Celsius>("Celsius")
            .unwrap()
            .register_exception::<ValueError>("ValueError")
            .unwrap();
        builder.build()
    }

    fn roundtrip(registry: &SerializerRegistry, value: &Value) -> Value {
        let encoded = registry.encode(value).unwrap();
        let bytes = encoded.to_bytes().unwrap();
        registry.decode(&Encoded::from_bytes(&bytes).unwrap()).unwrap()
    }

    #[test]
    fn test_decoded_set_drops_repeated_elements() {
        let registry = registry();
        let wire = Encoded::Set(vec![
            registry.encode(&Value::Int(1)).unwrap(),
            registry.encode(&Value::Int(2)).unwrap(),
            registry.encode(&Value::Int(1)).unwrap(),
        ]);

        let Value::Set(items) = registry.decode(&wire).unwrap() else {
            panic!("expected a set");
        };
        assert_eq!(items, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_nested_containers_keep_their_kind() {
        let registry = registry();
        let value = Value::Map(vec![
            (
                Value::Tuple(vec![Value::Int(1), Value::from("a")]),
                Value::List(vec![
                    Value::set([Value::Int(3), Value::Int(4)]),
                    Value::object(Celsius(21.5)),
                ]),
            ),
            (Value::Nil, Value::Bytes(Bytes::from_static(b"\x00\x01"))),
        ]);

        assert_eq!(roundtrip(&registry, &value), value);
    }

    #[test]
    fn test_registered_exception_round_trips_as_itself() {
        let registry = registry();
        let value = Value::error(ValueError("boom".to_string()));

        let decoded = roundtrip(&registry, &value);
        assert_eq!(
            decoded.downcast_error::<ValueError>(),
            Some(&ValueError("boom".to_string()))
        );
    }

    #[test]
    fn test_unregistered_exception_degrades_to_message() {
        let registry = SerializerRegistry::standard();
        let value = Value::error(ValueError("boom".to_string()));

        let decoded = roundtrip(&registry, &value);
        assert_eq!(decoded, Value::error(RemoteError::new("boom")));
    }

    #[test]
    fn test_unregistered_object_becomes_opaque() {
        let registry = SerializerRegistry::standard();
        let decoded = roundtrip(&registry, &Value::object(Celsius(1.0)));

        assert_eq!(
            decoded,
            Value::Opaque(Opaque {
                type_name: "Celsius".to_string(),
                repr: "Celsius(1.0)".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_signature_is_protocol_error() {
        let registry = SerializerRegistry::standard();
        let encoded = Encoded::List(vec![
            Encoded::Leaf {
                signature: BASIC_SIGNATURE.to_string(),
                payload: to_cbor(&1).unwrap(),
            },
            Encoded::Leaf {
                signature: "Celsius".to_string(),
                payload: Bytes::new(),
            },
        ]);

        assert!(matches!(registry.decode(&encoded), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_malformed_bytes_are_protocol_error() {
        assert!(matches!(
            Encoded::from_bytes(&[0xff, 0x00]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_duplicate_and_reserved_signatures_rejected() {
        let mut builder = SerializerRegistry::builder();
        builder.register_type::<Celsius>("Celsius").unwrap();

        assert!(matches!(
            builder.register_type::<Celsius>("Celsius"),
            Err(Error::Registry(RegistryError::DuplicateSignature(_)))
        ));
        assert!(matches!(
            builder.register_type::<Celsius>(FALLBACK_SIGNATURE),
            Err(Error::Registry(RegistryError::ReservedSignature(_)))
        ));
    }

    #[test]
    fn test_claim_order_is_priority_then_signature() {
        let registry = registry();
        assert_eq!(
            registry.signatures(),
            vec![
                BASIC_SIGNATURE,
                "ArgumentError",
                "ValueError",
                "Celsius",
                ERROR_SIGNATURE,
                FALLBACK_SIGNATURE
            ]
        );
    }
}
