//! Built-in serializers.

use super::{BASIC_SIGNATURE, ERROR_SIGNATURE, FALLBACK_SIGNATURE, Serializer, from_cbor, to_cbor};
use crate::error::{Error, Result};
use crate::value::{Opaque, RemoteError, Value};

use bytes::Bytes;
use ciborium::Value as Cbor;
use serde::{Deserialize, Serialize};

fn primitive_to_cbor(value: &Value) -> Option<Cbor> {
    Some(match value {
        Value::Nil => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Int(i) => Cbor::Integer((*i).into()),
        Value::Float(x) => Cbor::Float(*x),
        Value::Str(s) => Cbor::Text(s.clone()),
        Value::Bytes(b) => Cbor::Bytes(b.to_vec()),
        _ => return None,
    })
}

fn primitive_from_cbor(cbor: Cbor) -> Result<Value> {
    Ok(match cbor {
        Cbor::Null => Value::Nil,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(i) => Value::Int(
            i64::try_from(i128::from(i))
                .map_err(|_| Error::Protocol("integer out of range".to_string()))?,
        ),
        Cbor::Float(x) => Value::Float(x),
        Cbor::Text(s) => Value::Str(s),
        Cbor::Bytes(b) => Value::Bytes(Bytes::from(b)),
        other => {
            return Err(Error::Protocol(format!(
                "expected a primitive payload, got {other:?}"
            )));
        }
    })
}

/// Primitive leaves: nil, bool, int, float, str and bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicSerializer;

impl Serializer for BasicSerializer {
    fn signature(&self) -> &str {
        BASIC_SIGNATURE
    }

    fn claims(&self, value: &Value) -> bool {
        matches!(
            value,
            Value::Nil
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Float(_)
                | Value::Str(_)
                | Value::Bytes(_)
        )
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        let cbor = primitive_to_cbor(value)
            .ok_or_else(|| Error::Encoding(format!("{} is not a primitive", value.kind())))?;
        to_cbor(&cbor)
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Value> {
        primitive_from_cbor(from_cbor(payload)?)
    }
}

/// Any exception, reduced to its message.
///
/// Decodes as [`RemoteError`], so the receiving side sees a generic error
/// with the original text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorSerializer;

impl Serializer for ErrorSerializer {
    fn signature(&self) -> &str {
        ERROR_SIGNATURE
    }

    fn claims(&self, value: &Value) -> bool {
        matches!(value, Value::Error(_))
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        match value {
            Value::Error(exception) => to_cbor(&RemoteError::new(exception.message())),
            other => Err(Error::Encoding(format!(
                "{} is not an exception",
                other.kind()
            ))),
        }
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Value> {
        let error: RemoteError = from_cbor(payload)?;
        Ok(Value::error(error))
    }
}

#[derive(Serialize, Deserialize)]
enum Portable {
    Primitive(Cbor),
    Opaque(Opaque),
}

/// Catch-all serializer.
///
/// Primitives travel as themselves; anything else crosses as an
/// [`Opaque`] carrying its type name and debug rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackSerializer;

impl Serializer for FallbackSerializer {
    fn signature(&self) -> &str {
        FALLBACK_SIGNATURE
    }

    fn claims(&self, _value: &Value) -> bool {
        true
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        let portable = match value {
            Value::Opaque(opaque) => Portable::Opaque(opaque.clone()),
            Value::Object(object) => Portable::Opaque(Opaque {
                type_name: object.type_name().to_string(),
                repr: format!("{object:?}"),
            }),
            Value::Error(exception) => Portable::Opaque(Opaque {
                type_name: exception.type_name().to_string(),
                repr: exception.message(),
            }),
            other => primitive_to_cbor(other).map_or_else(
                || {
                    Portable::Opaque(Opaque {
                        type_name: other.kind().to_string(),
                        repr: other.to_string(),
                    })
                },
                Portable::Primitive,
            ),
        };
        to_cbor(&portable)
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Value> {
        match from_cbor(payload)? {
            Portable::Primitive(cbor) => primitive_from_cbor(cbor),
            Portable::Opaque(opaque) => Ok(Value::Opaque(opaque)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_claims_only_primitives() {
        assert!(BasicSerializer.claims(&Value::Int(1)));
        assert!(BasicSerializer.claims(&Value::Nil));
        assert!(!BasicSerializer.claims(&Value::List(vec![])));
        assert!(!BasicSerializer.claims(&Value::error(RemoteError::new("x"))));
    }

    #[test]
    fn test_basic_rejects_non_primitive_payload() {
        let payload = to_cbor(&vec![1, 2]).unwrap();
        assert!(matches!(
            BasicSerializer.deserialize(&payload),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_fallback_keeps_primitives() {
        let payload = FallbackSerializer.serialize(&Value::from("text")).unwrap();
        assert_eq!(
            FallbackSerializer.deserialize(&payload).unwrap(),
            Value::from("text")
        );
    }
}
