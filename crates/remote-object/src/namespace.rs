//! Server-side namespaces and their flattening into dotted member names.

use crate::schema::{Capability, is_reserved};
use crate::value::{ArgumentError, CallArgs, Exception, Value};

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Result of invoking a member.
pub type CallResult<T> = std::result::Result<T, Exception>;

/// Lazily produced items of a generator member.
pub type ValueIter = Box<dyn Iterator<Item = CallResult<Value>> + Send>;

/// Function member body.
pub type FunctionFn = dyn Fn(CallArgs) -> CallResult<Value> + Send + Sync;

/// Generator member body.
pub type GeneratorFn = dyn Fn(CallArgs) -> CallResult<ValueIter> + Send + Sync;

/// Value member getter, evaluated on every read.
pub type GetterFn = dyn Fn() -> Value + Send + Sync;

/// A value cell that can change while served.
pub type SharedValue = Arc<RwLock<Value>>;

/// Create a [`SharedValue`].
pub fn shared_value(value: impl Into<Value>) -> SharedValue {
    Arc::new(RwLock::new(value.into()))
}

/// One exposed entry.
#[derive(Clone)]
pub enum Member {
    /// Returns one value per call.
    Function(Arc<FunctionFn>),
    /// Produces a stream of values per call.
    Generator(Arc<GeneratorFn>),
    /// Plain value.
    Value(Arc<GetterFn>),
    /// Nested namespace.
    Namespace(Namespace),
}

impl Member {
    /// A function member.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(CallArgs) -> CallResult<Value> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// A generator member; each call starts a fresh iteration.
    pub fn generator<F, I>(f: F) -> Self
    where
        F: Fn(CallArgs) -> CallResult<I> + Send + Sync + 'static,
        I: IntoIterator<Item = CallResult<Value>>,
        I::IntoIter: Send + 'static,
    {
        Self::Generator(Arc::new(move |args: CallArgs| {
            f(args).map(|items| Box::new(items.into_iter()) as ValueIter)
        }))
    }

    /// A fixed value.
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::Value(Arc::new(move || value.clone()))
    }

    /// A value read from a shared cell on every access.
    #[must_use]
    pub fn shared(cell: &SharedValue) -> Self {
        let cell = Arc::clone(cell);
        Self::Value(Arc::new(move || cell.read().clone()))
    }

    /// A value computed on every access.
    pub fn getter<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self::Value(Arc::new(f))
    }

    /// Classification, fixed by the variant.
    #[must_use]
    pub const fn capability(&self) -> Capability {
        match self {
            Self::Function(_) | Self::Generator(_) => Capability::Callable,
            Self::Value(_) => Capability::Value,
            Self::Namespace(_) => Capability::Module,
        }
    }

    /// Invoke locally. Generators are drained into a list; values take no
    /// arguments.
    ///
    /// # Errors
    ///
    /// Raises whatever the member raises, or [`ArgumentError`] for a value
    /// called with arguments or a namespace called at all.
    pub fn call(&self, args: CallArgs) -> CallResult<Value> {
        match self {
            Self::Function(f) => f(args),
            Self::Generator(f) => f(args)?.collect::<CallResult<Vec<_>>>().map(Value::List),
            Self::Value(get) => {
                if args.is_empty() {
                    Ok(get())
                } else {
                    Err(ArgumentError("a value takes no arguments".to_string()).into())
                }
            }
            Self::Namespace(ns) => {
                Err(ArgumentError(format!("namespace '{}' is not callable", ns.name())).into())
            }
        }
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function"),
            Self::Generator(_) => f.write_str("Generator"),
            Self::Value(get) => f.debug_tuple("Value").field(&get()).finish(),
            Self::Namespace(ns) => f.debug_tuple("Namespace").field(&ns.name).finish(),
        }
    }
}

/// A named group of members.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    name: String,
    members: IndexMap<String, Member>,
}

impl Namespace {
    /// An empty namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: IndexMap::new(),
        }
    }

    /// Add a member.
    #[must_use]
    pub fn with(mut self, attr: impl Into<String>, member: Member) -> Self {
        self.insert(attr, member);
        self
    }

    /// Add a function member.
    #[must_use]
    pub fn function<F>(self, attr: impl Into<String>, f: F) -> Self
    where
        F: Fn(CallArgs) -> CallResult<Value> + Send + Sync + 'static,
    {
        self.with(attr, Member::function(f))
    }

    /// Add a nested namespace under its own name.
    #[must_use]
    pub fn nest(self, child: Self) -> Self {
        let attr = child.name.clone();
        self.with(attr, Member::Namespace(child))
    }

    /// Insert or replace a member.
    pub fn insert(&mut self, attr: impl Into<String>, member: Member) {
        self.members.insert(attr.into(), member);
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member by attribute.
    #[must_use]
    pub fn get(&self, attr: &str) -> Option<&Member> {
        self.members.get(attr)
    }

    /// Member by dotted path relative to this namespace.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&Member> {
        match path.split_once('.') {
            None => self.get(path),
            Some((head, rest)) => match self.get(head)? {
                Member::Namespace(child) => child.resolve(rest),
                _ => None,
            },
        }
    }

    /// Members in insertion order.
    pub fn members(&self) -> impl Iterator<Item = (&str, &Member)> {
        self.members.iter().map(|(attr, member)| (attr.as_str(), member))
    }

    /// Number of direct members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether there are no direct members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// What a server exposes.
#[derive(Debug, Clone)]
pub enum Exposed {
    /// Explicitly named entries, used as given.
    Mapping(IndexMap<String, Member>),
    /// A namespace; names are its display name plus each public attribute.
    Namespace(Namespace),
}

impl Exposed {
    /// Explicit name to member mapping.
    pub fn mapping<K: Into<String>>(entries: impl IntoIterator<Item = (K, Member)>) -> Self {
        Self::Mapping(
            entries
                .into_iter()
                .map(|(name, member)| (name.into(), member))
                .collect(),
        )
    }

    /// Display name used for `_name`.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::Mapping(_) => None,
            Self::Namespace(ns) => Some(ns.name()),
        }
    }
}

impl From<Namespace> for Exposed {
    fn from(ns: Namespace) -> Self {
        Self::Namespace(ns)
    }
}

impl Default for Exposed {
    fn default() -> Self {
        Self::Mapping(IndexMap::new())
    }
}

/// Flatten exposed members into dotted names.
///
/// Mapping keys are kept verbatim (reserved names excepted); namespace
/// attributes are prefixed with the namespace name and private (`_`)
/// attributes are skipped. Nested namespaces are listed themselves and
/// flattened beneath their name.
#[must_use]
pub fn flatten(exposed: &Exposed) -> IndexMap<String, Member> {
    let mut flat = IndexMap::new();

    match exposed {
        Exposed::Mapping(entries) => {
            for (name, member) in entries {
                if is_reserved(name) {
                    warn!("Skipping reserved member name {}", name);
                    continue;
                }
                add(&mut flat, name.clone(), member);
            }
        }
        Exposed::Namespace(ns) => add_children(&mut flat, ns.name(), ns),
    }

    flat
}

fn add(flat: &mut IndexMap<String, Member>, name: String, member: &Member) {
    flat.insert(name.clone(), member.clone());
    if let Member::Namespace(child) = member {
        add_children(flat, &name, child);
    }
}

fn add_children(flat: &mut IndexMap<String, Member>, prefix: &str, ns: &Namespace) {
    for (attr, member) in ns.members() {
        if attr.starts_with('_') {
            continue;
        }
        let name = if prefix.is_empty() {
            attr.to_string()
        } else {
            format!("{prefix}.{attr}")
        };
        add(flat, name, member);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub() -> Namespace {
        Namespace::new("sub")
            .function("foo", |_| Ok(Value::from("foo")))
            .with("_hidden", Member::constant(0))
    }

    #[test]
    fn test_mapping_keys_verbatim_with_nested_namespace() {
        let exposed = Exposed::mapping([
            ("CONST", Member::constant(42)),
            ("add", Member::function(|_| Ok(Value::Nil))),
            ("sub", Member::Namespace(sub())),
            ("_schema", Member::constant(0)),
        ]);

        let flat = flatten(&exposed);
        let names: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["CONST", "add", "sub", "sub.foo"]);
    }

    #[test]
    fn test_namespace_names_are_prefixed() {
        let ns = Namespace::new("calc")
            .function("add", |_| Ok(Value::Nil))
            .with("_private", Member::constant(1))
            .nest(sub());

        let flat = flatten(&ns.into());
        assert!(flat.contains_key("calc.add"));
        assert!(flat.contains_key("calc.sub"));
        assert!(flat.contains_key("calc.sub.foo"));
        assert!(!flat.contains_key("calc._private"));
        assert!(!flat.contains_key("calc.sub._hidden"));
    }

    #[test]
    fn test_shared_value_is_read_each_time() {
        let cell = shared_value(1);
        let member = Member::shared(&cell);

        assert_eq!(member.call(CallArgs::new()).unwrap(), Value::Int(1));
        *cell.write() = Value::Int(2);
        assert_eq!(member.call(CallArgs::new()).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_value_rejects_arguments() {
        let err = Member::constant(1).call(CallArgs::new().arg(1)).unwrap_err();
        assert!(err.is::<ArgumentError>());
    }

    #[test]
    fn test_generator_called_locally_collects() {
        let member = Member::generator(|_| Ok((1..=3).map(|i| Ok(Value::Int(i)))));
        assert_eq!(
            member.call(CallArgs::new()).unwrap(),
            Value::from(vec![1_i64, 2, 3])
        );
    }

    #[test]
    fn test_resolve_dotted_path() {
        let ns = Namespace::new("root").nest(sub());
        assert!(matches!(ns.resolve("sub.foo"), Some(Member::Function(_))));
        assert!(ns.resolve("sub.missing").is_none());
        assert!(ns.resolve("sub.foo.deeper").is_none());
    }
}
