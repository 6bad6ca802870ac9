//! Dynamic values exchanged by remote calls.
//!
//! A [`Value`] is the Rust form of an argument, return value or stream
//! chunk: primitive leaves, containers whose kind is part of their identity,
//! domain objects erased behind [`ObjectValue`], and exceptions.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// A domain-specific value carried as an [`Value::Object`] leaf.
///
/// Implemented for every `Debug + PartialEq + Send + Sync + 'static` type.
pub trait ObjectValue: Any + fmt::Debug + Send + Sync {
    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Equality across erased values of possibly different types.
    fn dyn_eq(&self, other: &dyn ObjectValue) -> bool;

    /// Short name of the concrete type.
    fn type_name(&self) -> &'static str;
}

impl<T> ObjectValue for T
where
    T: Any + fmt::Debug + PartialEq + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn ObjectValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn type_name(&self) -> &'static str {
        short_type_name::<T>()
    }
}

/// A shared, type-erased domain object.
#[derive(Clone)]
pub struct Object(Arc<dyn ObjectValue>);

impl Object {
    /// Wrap a domain value.
    pub fn new<T: ObjectValue>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the concrete value if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Whether the concrete value is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.0.as_any().is::<T>()
    }

    /// Short name of the concrete type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(&*other.0)
    }
}

/// An exception raised by a handler, or reconstructed from the wire.
///
/// Two exceptions are equal when they have the same type and message.
#[derive(Clone)]
pub struct Exception {
    inner: Arc<dyn StdError + Send + Sync>,
    type_name: &'static str,
}

impl Exception {
    /// Wrap an error value.
    pub fn new<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Self {
            inner: Arc::new(error),
            type_name: short_type_name::<E>(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> String {
        self.inner.to_string()
    }

    /// Short name of the concrete error type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrow the concrete error if it is an `E`.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Whether the concrete error is an `E`.
    #[must_use]
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    /// Borrow as a standard error.
    #[must_use]
    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }
}

impl<E: StdError + Send + Sync + 'static> From<E> for Exception {
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.type_name, self.message())
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl PartialEq for Exception {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.message() == other.message()
    }
}

/// Generic remote error carrying only a message.
///
/// Used when the original exception type is not registered on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    /// The original error message.
    pub message: String,
}

impl RemoteError {
    /// Create a remote error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Raised when call arguments are missing or have the wrong kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{0}")]
pub struct ArgumentError(pub String);

/// An object that crossed the wire through the catch-all serializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opaque {
    /// Type name on the sending side.
    pub type_name: String,
    /// Debug rendering on the sending side.
    pub repr: String,
}

/// A dynamic value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value.
    Nil,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// Ordered, mutable-style sequence.
    List(Vec<Value>),
    /// Ordered, fixed sequence.
    Tuple(Vec<Value>),
    /// Unordered collection of distinct values.
    Set(Vec<Value>),
    /// Ordered key/value pairs.
    Map(Vec<(Value, Value)>),
    /// Domain object.
    Object(Object),
    /// Exception.
    Error(Exception),
    /// Object received through the catch-all serializer.
    Opaque(Opaque),
}

impl Value {
    /// Wrap a domain object.
    pub fn object<T: ObjectValue>(value: T) -> Self {
        Self::Object(Object::new(value))
    }

    /// Wrap an error.
    pub fn error<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Self::Error(Exception::new(error))
    }

    /// Build a set, dropping duplicates while keeping first occurrences.
    pub fn set(items: impl IntoIterator<Item = Self>) -> Self {
        let mut unique: Vec<Self> = Vec::new();
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Self::Set(unique)
    }

    /// Build a map with string keys.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Self>,
        V: Into<Self>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Short name of the value's kind, for messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Object(object) => object.type_name(),
            Self::Error(exception) => exception.type_name(),
            Self::Opaque(_) => "opaque",
        }
    }

    /// Whether the value is a list, tuple, set or map.
    #[must_use]
    pub const fn is_container(&self) -> bool {
        matches!(
            self,
            Self::List(_) | Self::Tuple(_) | Self::Set(_) | Self::Map(_)
        )
    }

    /// Whether the value is [`Value::Nil`].
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    #[must_use]
    #[allow(missing_docs)]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    #[allow(missing_docs)]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float value; integers widen.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    #[allow(missing_docs)]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    #[allow(missing_docs)]
    pub const fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Elements of a list, tuple or set.
    #[must_use]
    pub fn as_seq(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) | Self::Tuple(items) | Self::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Entries of a map.
    #[must_use]
    pub fn as_map(&self) -> Option<&[(Self, Self)]> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a map entry by string key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    /// Borrow a domain object of type `T`.
    #[must_use]
    pub fn downcast_object<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(object) => object.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Borrow an exception of type `E`.
    #[must_use]
    pub fn downcast_error<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Error(exception) => exception.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            #[allow(clippy::float_cmp)]
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => {
                a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
            }
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::List(items) => {
                f.write_str("[")?;
                join(f, items)?;
                f.write_str("]")
            }
            Self::Tuple(items) => {
                f.write_str("(")?;
                join(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::Set(items) => {
                f.write_str("{")?;
                join(f, items)?;
                f.write_str("}")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Self::Object(object) => write!(f, "{object:?}"),
            Self::Error(exception) => write!(f, "{}: {exception}", exception.type_name()),
            Self::Opaque(opaque) => write!(f, "<{} {}>", opaque.type_name, opaque.repr),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Self::Object(object)
    }
}

impl From<Exception> for Value {
    fn from(exception: Exception) -> Self {
        Self::Error(exception)
    }
}

impl From<Opaque> for Value {
    fn from(opaque: Opaque) -> Self {
        Self::Opaque(opaque)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(option: Option<T>) -> Self {
        option.map_or(Self::Nil, Into::into)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl FromIterator<Self> for Value {
    fn from_iter<I: IntoIterator<Item = Self>>(iter: I) -> Self {
        Self::List(iter.into_iter().collect())
    }
}

/// Positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments, in insertion order.
    pub kwargs: IndexMap<String, Value>,
}

impl CallArgs {
    /// No arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional arguments only.
    pub fn positional<T: Into<Value>>(args: impl IntoIterator<Item = T>) -> Self {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            kwargs: IndexMap::new(),
        }
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Whether there are no arguments at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Argument by keyword, else by position.
    #[must_use]
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.kwargs.get(name).or_else(|| self.args.get(index))
    }

    /// Required argument by keyword, else by position.
    ///
    /// # Errors
    ///
    /// Raises [`ArgumentError`] if the argument is missing.
    pub fn required(&self, index: usize, name: &str) -> Result<&Value, Exception> {
        self.get(index, name).ok_or_else(|| {
            ArgumentError(format!("missing required argument '{name}'")).into()
        })
    }

    /// Required integer argument.
    ///
    /// # Errors
    ///
    /// Raises [`ArgumentError`] if the argument is missing or not an int.
    pub fn int(&self, index: usize, name: &str) -> Result<i64, Exception> {
        let value = self.required(index, name)?;
        value.as_int().ok_or_else(|| mismatch(name, "int", value))
    }

    /// Required numeric argument; integers widen.
    ///
    /// # Errors
    ///
    /// Raises [`ArgumentError`] if the argument is missing or not numeric.
    pub fn float(&self, index: usize, name: &str) -> Result<f64, Exception> {
        let value = self.required(index, name)?;
        value.as_float().ok_or_else(|| mismatch(name, "float", value))
    }

    /// Required string argument.
    ///
    /// # Errors
    ///
    /// Raises [`ArgumentError`] if the argument is missing or not a string.
    pub fn str(&self, index: usize, name: &str) -> Result<&str, Exception> {
        let value = self.required(index, name)?;
        value.as_str().ok_or_else(|| mismatch(name, "str", value))
    }
}

fn mismatch(name: &str, expected: &str, got: &Value) -> Exception {
    ArgumentError(format!(
        "argument '{name}' must be {expected}, got {}",
        got.kind()
    ))
    .into()
}

/// Last path segment of a type name, generics excluded.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
