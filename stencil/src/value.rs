//! Runtime values
//!
//! Templates are evaluated against dynamically typed [`Value`]s. Host data enters
//! through the conversion impls at the bottom of this module, or through the
//! [`Object`] trait for types that expose named fields and methods.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A runtime value in the template
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The absent value; renders as nothing
    #[default]
    None,
    /// A boolean
    Bool(bool),
    /// A signed integer
    Int(i64),
    /// A floating point number
    Float(f64),
    /// A string
    String(String),
    /// An ordered list of values
    List(Vec<Value>),
    /// A string-keyed mapping
    Dict(BTreeMap<String, Value>),
    /// A host object with named fields and (optionally) methods
    Object(Arc<dyn Object>),
    /// A method bound to its receiver, not yet invoked
    Method(BoundMethod),
}

impl Value {
    /// Wrap a host object.
    pub fn from_object(object: impl Object + 'static) -> Self {
        Value::Object(Arc::new(object))
    }

    /// Whether this value equals the zero value of its kind.
    ///
    /// Zero values are: `none`, `false`, `0`, `0.0`, the empty string and the
    /// empty list or dict. Objects and methods are never zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::None => true,
            Value::Bool(b) => !*b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::String(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Dict(d) => d.is_empty(),
            Value::Object(_) | Value::Method(_) => false,
        }
    }

    /// Truthiness used by conditions: booleans are themselves, everything else
    /// is true when it differs from its zero value.
    pub fn is_truthy(&self) -> bool {
        !self.is_zero()
    }

    /// Kind name used in error messages (`string`, `int`, ...)
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Object(object) => object.type_name(),
            Value::Method(_) => "method",
        }
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Dict(_) => f.write_str("[object]"),
            Value::Object(object) => object.render(f),
            Value::Method(method) => write!(f, "[method {}]", method.name()),
        }
    }
}

/// Field- and method-bearing host values.
///
/// Implement this for types that templates should reach into with dotted
/// paths (`person.Name`, `person.SayHello`). Methods take priority over
/// fields of the same name.
pub trait Object: fmt::Debug + Send + Sync {
    /// Name used in diagnostics
    fn type_name(&self) -> &str {
        "object"
    }

    /// Look up a field by name
    fn field(&self, name: &str) -> Option<Value>;

    /// Number of arguments the method `name` requires, or `None` if there is no
    /// such method
    fn method_arity(&self, name: &str) -> Option<usize> {
        let _ = name;
        None
    }

    /// Invoke the method `name`. The evaluator only calls this with exactly
    /// [`Object::method_arity`] arguments.
    ///
    /// Returning more than one value is reported as an evaluation error; an empty
    /// result renders as the empty string.
    fn call_method(&self, name: &str, args: Vec<Value>) -> Vec<Value> {
        let _ = (name, args);
        Vec::new()
    }

    /// How the object renders when interpolated directly
    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[object]")
    }
}

/// Anything that can be invoked with a fixed number of arguments.
pub trait Callable {
    /// Required argument count
    fn arity(&self) -> usize;

    /// Invoke with exactly [`Callable::arity`] arguments
    fn call(&self, args: Vec<Value>) -> Vec<Value>;
}

/// A method reference carrying its receiver.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    receiver: Arc<dyn Object>,
    name: Arc<str>,
    arity: usize,
}

impl BoundMethod {
    /// Bind `name` on `receiver`.
    pub fn new(receiver: Arc<dyn Object>, name: impl Into<Arc<str>>, arity: usize) -> Self {
        Self {
            receiver,
            name: name.into(),
            arity,
        }
    }

    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Callable for BoundMethod {
    fn arity(&self) -> usize {
        self.arity
    }

    fn call(&self, args: Vec<Value>) -> Vec<Value> {
        self.receiver.call_method(&self.name, args)
    }
}

type MethodFn = Arc<dyn Fn(&Record, Vec<Value>) -> Vec<Value> + Send + Sync>;

/// A ready-made [`Object`]: named fields plus closures registered as methods.
///
/// ```
/// use stencil::{Record, Value};
///
/// let person = Record::new("Person")
///     .with_field("Name", "Florian")
///     .with_method("Greet", 1, |this, args| {
///         let name = this.get("Name").map(|v| v.to_string()).unwrap_or_default();
///         vec![Value::from(format!("{name} greets {}", args[0]))]
///     });
/// assert_eq!(person.get("Name").map(|v| v.to_string()).as_deref(), Some("Florian"));
/// ```
#[derive(Clone)]
pub struct Record {
    type_name: String,
    fields: BTreeMap<String, Value>,
    methods: HashMap<String, (usize, MethodFn)>,
}

impl Record {
    /// An empty record; `type_name` shows up in diagnostics.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
            methods: HashMap::new(),
        }
    }

    /// Add a field (builder style)
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Add a method requiring `arity` arguments (builder style)
    pub fn with_method<F>(mut self, name: impl Into<String>, arity: usize, method: F) -> Self
    where
        F: Fn(&Record, Vec<Value>) -> Vec<Value> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), (arity, Arc::new(method)));
        self
    }

    /// Add or replace a field
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Borrow a field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Record")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .field("methods", &methods)
            .finish()
    }
}

impl Object for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    fn method_arity(&self, name: &str) -> Option<usize> {
        self.methods.get(name).map(|(arity, _)| *arity)
    }

    fn call_method(&self, name: &str, args: Vec<Value>) -> Vec<Value> {
        match self.methods.get(name) {
            Some((_, method)) => method(self, args),
            None => Vec::new(),
        }
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
        (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Dict(a), Value::Dict(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Int(i64::from(n))
                }
            }
        )*
    };
}

from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::Float(f64::from(x))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::String(c.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}

impl<K: Into<String>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(map: BTreeMap<K, V>) -> Self {
        Value::Dict(map.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<Value>> From<HashMap<K, V>> for Value {
    fn from(map: HashMap<K, V>) -> Self {
        Value::Dict(map.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(Arc::new(record))
    }
}

impl From<Arc<dyn Object>> for Value {
    fn from(object: Arc<dyn Object>) -> Self {
        Value::Object(object)
    }
}

impl From<BoundMethod> for Value {
    fn from(method: BoundMethod) -> Self {
        Value::Method(method)
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Dict(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
