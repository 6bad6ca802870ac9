//! Whole-call codec built on the serializer registry.
//!
//! A call travels as zero wire arguments when it has no arguments at all,
//! otherwise as exactly two: the encoded positional tuple and the encoded
//! keyword map. Replies and stream chunks are single encoded values.

use crate::error::{Error, Result};
use crate::serializer::{Encoded, SerializerRegistry};
use crate::value::{CallArgs, Exception, RemoteError, Value};

use bytes::Bytes;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Encodes calls, replies and faults with a shared registry.
#[derive(Debug, Clone)]
pub struct Encoder {
    registry: Arc<SerializerRegistry>,
}

impl Encoder {
    /// Create an encoder over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<SerializerRegistry>) -> Self {
        Self { registry }
    }

    /// The registry in use.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SerializerRegistry> {
        &self.registry
    }

    /// Encode call arguments into wire arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if an argument cannot be serialized.
    pub fn encode(&self, call: &CallArgs) -> Result<Vec<Bytes>> {
        if call.is_empty() {
            return Ok(Vec::new());
        }

        let args = Encoded::Tuple(
            call.args
                .iter()
                .map(|arg| self.registry.encode(arg))
                .collect::<Result<_>>()?,
        );
        let kwargs = Encoded::Map(
            call.kwargs
                .iter()
                .map(|(name, value)| {
                    Ok((
                        self.registry.encode(&Value::Str(name.clone()))?,
                        self.registry.encode(value)?,
                    ))
                })
                .collect::<Result<_>>()?,
        );

        Ok(vec![args.to_bytes()?, kwargs.to_bytes()?])
    }

    /// Decode wire arguments into call arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the wire arguments are missing, extra
    /// or malformed.
    pub fn decode(&self, wire: &[Bytes]) -> Result<CallArgs> {
        let [args, kwargs] = wire else {
            if wire.is_empty() {
                return Ok(CallArgs::new());
            }
            return Err(Error::Protocol(format!(
                "expected 0 or 2 wire arguments, got {}",
                wire.len()
            )));
        };

        let args = match self.decode_value(args)? {
            Value::Tuple(items) | Value::List(items) => items,
            other => {
                return Err(Error::Protocol(format!(
                    "positional arguments must be a tuple, got {}",
                    other.kind()
                )));
            }
        };

        let kwargs = match self.decode_value(kwargs)? {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(name, value)| match name {
                    Value::Str(name) => Ok((name, value)),
                    other => Err(Error::Protocol(format!(
                        "keyword names must be strings, got {}",
                        other.kind()
                    ))),
                })
                .collect::<Result<IndexMap<_, _>>>()?,
            other => {
                return Err(Error::Protocol(format!(
                    "keyword arguments must be a map, got {}",
                    other.kind()
                )));
            }
        };

        Ok(CallArgs { args, kwargs })
    }

    /// Encode a reply or stream chunk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the value cannot be serialized.
    pub fn encode_value(&self, value: &Value) -> Result<Bytes> {
        self.registry.encode(value)?.to_bytes()
    }

    /// Decode a reply or stream chunk. An empty payload is [`Value::Nil`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the payload is malformed or uses an
    /// unknown signature.
    pub fn decode_value(&self, payload: &[u8]) -> Result<Value> {
        if payload.is_empty() {
            return Ok(Value::Nil);
        }
        self.registry.decode(&Encoded::from_bytes(payload)?)
    }

    /// Encode a raised exception for the error channel: its message, plus
    /// the encoded exception when encoding succeeds.
    pub fn encode_fault(&self, exception: &Exception) -> (String, Option<Bytes>) {
        let message = exception.message();
        match self.encode_value(&Value::Error(exception.clone())) {
            Ok(payload) => (message, Some(payload)),
            Err(e) => {
                warn!("Failed to encode {} exception: {}", exception.type_name(), e);
                (message, None)
            }
        }
    }

    /// Rebuild an exception from the error channel, degrading to
    /// [`RemoteError`] when the payload is absent or undecodable.
    pub fn decode_fault(&self, message: &str, payload: Option<&[u8]>) -> Exception {
        let decoded = payload.and_then(|payload| match self.decode_value(payload) {
            Ok(Value::Error(exception)) => Some(exception),
            Ok(other) => {
                debug!("Error payload decoded to a {}, not an exception", other.kind());
                None
            }
            Err(e) => {
                debug!("Failed to decode error payload: {}", e);
                None
            }
        });

        decoded.unwrap_or_else(|| RemoteError::new(message).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ArgumentError;

    fn encoder() -> Encoder {
        Encoder::new(SerializerRegistry::standard())
    }

    #[test]
    fn test_empty_call_has_no_wire_arguments() {
        let encoder = encoder();
        let wire = encoder.encode(&CallArgs::new()).unwrap();
        assert!(wire.is_empty());
        assert_eq!(encoder.decode(&wire).unwrap(), CallArgs::new());
    }

    #[test]
    fn test_call_round_trip() {
        let encoder = encoder();
        let call = CallArgs::new()
            .arg(2)
            .arg(Value::Tuple(vec![Value::from("x"), Value::Nil]))
            .kwarg("scale", 1.5)
            .kwarg("tags", vec!["a", "b"]);

        let wire = encoder.encode(&call).unwrap();
        assert_eq!(wire.len(), 2);
        assert_eq!(encoder.decode(&wire).unwrap(), call);
    }

    #[test]
    fn test_kwargs_only_call_still_uses_two_arguments() {
        let encoder = encoder();
        let call = CallArgs::new().kwarg("flag", true);
        assert_eq!(encoder.encode(&call).unwrap().len(), 2);
    }

    #[test]
    fn test_wrong_wire_argument_count() {
        let encoder = encoder();
        let one = encoder.encode_value(&Value::Int(1)).unwrap();
        assert!(matches!(encoder.decode(&[one]), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_fault_round_trip() {
        let encoder = encoder();
        let raised = Exception::from(ArgumentError("bad".to_string()));

        let (message, payload) = encoder.encode_fault(&raised);
        assert_eq!(message, "bad");

        let rebuilt = encoder.decode_fault(&message, payload.as_deref());
        assert!(rebuilt.is::<ArgumentError>());
        assert_eq!(rebuilt, raised);
    }

    #[test]
    fn test_fault_without_payload_degrades() {
        let rebuilt = encoder().decode_fault("boom", None);
        assert!(rebuilt.is::<RemoteError>());
        assert_eq!(rebuilt.message(), "boom");

        let garbage = encoder().decode_fault("boom", Some(b"\xff\xff"));
        assert!(garbage.is::<RemoteError>());
    }

    #[test]
    fn test_empty_reply_is_nil() {
        assert_eq!(encoder().decode_value(&[]).unwrap(), Value::Nil);
    }
}
