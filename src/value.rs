use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Serialize, Serializer};

use crate::serialization::CYCLE_MARKER;

/// Structural representation of a value, produced by the structural serializer and consumed by
/// the renderer.
///
/// Object members keep their declaration order here; ordering rules are applied when rendering.
///
/// # Examples
///
/// ```rust
/// use veracity::value::Value;
/// let v = Value::from("hello");
/// assert_eq!(v.type_name(), "String");
/// assert!(Value::default().is_null());
/// ```
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// A struct-like value; `type_name` is the declared name when known.
    Object {
        type_name: Option<String>,
        members: Vec<(String, Value)>,
    },
    /// A keyed collection; always rendered sorted by key.
    Map(Vec<(String, Value)>),
    /// A node that may be referenced from several places, including itself.
    Shared(SharedValue),
}

impl Value {
    /// Returns the variant name of the value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Object { .. } => "Object",
            Value::Map(_) => "Map",
            Value::Shared(_) => "Shared",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for lists and maps with no entries.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// Builds an anonymous object from `(name, value)` pairs.
    pub fn object<K, I>(members: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object {
            type_name: None,
            members: members.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Builds a named object from `(name, value)` pairs.
    pub fn named_object<K, I>(type_name: impl Into<String>, members: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object {
            type_name: Some(type_name.into()),
            members: members.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value as i128)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<SharedValue> for Value {
    fn from(node: SharedValue) -> Self {
        Value::Shared(node)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i as i128)
                } else if let Some(u) = n.as_u64() {
                    Value::Int(u as i128)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

thread_local! {
    /// Shared nodes being serialized on this thread, innermost last.
    static SERIALIZING: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// Lets a `Value` sit inside user types that go through serde. Object type names are not
/// carried over, and a node re-entered on the current path becomes the cycle marker.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i128(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bytes(bytes) => serializer.serialize_bytes(bytes),
            Value::List(items) => serializer.collect_seq(items),
            Value::Object { members, .. } | Value::Map(members) => {
                serializer.collect_map(members.iter().map(|(k, v)| (k, v)))
            }
            Value::Shared(node) => {
                let id = node.id();
                if !SERIALIZING.with(|path| path.borrow_mut().insert(id)) {
                    return serializer.serialize_str(CYCLE_MARKER);
                }
                let result = node.with(|inner| inner.serialize(serializer));
                SERIALIZING.with(|path| path.borrow_mut().remove(&id));
                result
            }
        }
    }
}

// ------------------------------------------------------------------------
// Shared nodes
// ------------------------------------------------------------------------

/// A reference-counted, mutable value node. Cloning shares the node.
///
/// Identity (not content) is what the renderer uses for cycle detection.
///
/// ```rust
/// use veracity::value::{SharedValue, Value};
/// let node = SharedValue::new(Value::object([("name", Value::from("root"))]));
/// node.set(Value::object([("self", Value::Shared(node.clone()))]));
/// assert!(node.ptr_eq(&node.clone()));
/// ```
#[derive(Clone, Default)]
pub struct SharedValue(Arc<RwLock<Value>>);

impl SharedValue {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Replaces the node's content. Used to close cycles after construction.
    pub fn set(&self, value: Value) {
        *self.0.write() = value;
    }

    /// Runs `f` with a read view of the node.
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.0.read_recursive())
    }

    /// Stable identity of the node for the lifetime of the allocation.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &SharedValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedValue {
    // Content is not printed: a cyclic node would recurse forever.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:#x})", self.id())
    }
}
