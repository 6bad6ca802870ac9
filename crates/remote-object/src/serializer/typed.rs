//! Serializers for registered domain types and exception types.

use super::{Serializer, from_cbor, to_cbor};
use crate::error::{Error, Result};
use crate::value::{ObjectValue, Value};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use std::error::Error as StdError;
use std::marker::PhantomData;

/// Carries a domain type `T` as an [`Value::Object`] leaf.
pub struct TypedSerializer<T> {
    signature: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSerializer<T>
where
    T: ObjectValue + Serialize + DeserializeOwned,
{
    /// Create a serializer for `T` under `signature`.
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> Serializer for TypedSerializer<T>
where
    T: ObjectValue + Serialize + DeserializeOwned,
{
    fn signature(&self) -> &str {
        &self.signature
    }

    fn claims(&self, value: &Value) -> bool {
        value.downcast_object::<T>().is_some()
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        let object = value.downcast_object::<T>().ok_or_else(|| {
            Error::Encoding(format!("{} is not a {}", value.kind(), self.signature))
        })?;
        to_cbor(object)
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Value> {
        let object: T = from_cbor(payload)?;
        Ok(Value::object(object))
    }
}

/// Carries an exception type `E` so it is raised as itself on the other
/// side.
pub struct ExceptionSerializer<E> {
    signature: String,
    _marker: PhantomData<fn() -> E>,
}

impl<E> ExceptionSerializer<E>
where
    E: StdError + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Create a serializer for `E` under `signature`.
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            _marker: PhantomData,
        }
    }
}

impl<E> Serializer for ExceptionSerializer<E>
where
    E: StdError + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    fn signature(&self) -> &str {
        &self.signature
    }

    fn claims(&self, value: &Value) -> bool {
        value.downcast_error::<E>().is_some()
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        let error = value.downcast_error::<E>().ok_or_else(|| {
            Error::Encoding(format!("{} is not a {}", value.kind(), self.signature))
        })?;
        to_cbor(error)
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Value> {
        let error: E = from_cbor(payload)?;
        Ok(Value::error(error))
    }
}
