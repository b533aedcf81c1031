//! Values held by model traits and by model state snapshots.
//!
//! A [`Value`] is either plain data (scalars, lists and dictionaries) or an
//! opaque [`Object`] such as an attached structure. Only plain data may appear
//! in a persisted model state; serializing an [`Value::Object`] fails.
//!
//! Lists are reference counted. Cloning a [`Value`] therefore copies every
//! dictionary level but shares list leaves, which is the copy boundary used by
//! [`crate::utils::shallow_copy_nested_dict`].

use std::fmt;
use std::rc::Rc;

use downcast_rs::{Downcast, impl_downcast};
use indexmap::IndexMap;
use itertools::Itertools;

/// An insertion-ordered mapping of names to values.
pub type ValueMap = IndexMap<String, Value>;

/// A dynamically typed trait value.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// The absence of a value.
    #[default]
    None,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Str(String),
    /// A list, shared between clones.
    List(Rc<Vec<Value>>),
    /// An ordered dictionary, copied on clone.
    Dict(ValueMap),
    /// A live reference to an opaque object. Never part of a model state.
    #[serde(skip)]
    Object(Object),
}

impl Value {
    /// Builds a list value from anything convertible into values.
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(Rc::new(items.into_iter().map_into().collect()))
    }

    /// Builds a dictionary value from `(key, value)` pairs.
    pub fn dict<K: Into<String>, T: Into<Value>>(items: impl IntoIterator<Item = (K, T)>) -> Self {
        Value::Dict(
            items
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// A short name for the kind of value, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Object(_) => "object",
        }
    }

    /// Returns `true` for [`Value::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Returns the boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the number as a float. Integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list items, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Returns the dictionary, if this is one.
    pub fn as_dict(&self) -> Option<&ValueMap> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the object reference, if this is one.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => write!(f, "[{}]", items.iter().join(", ")),
            Value::Dict(map) => write!(
                f,
                "{{{}}}",
                map.iter().map(|(k, v)| format!("{k:?}: {v}")).join(", ")
            ),
            Value::Object(obj) => write!(f, "{obj:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::list(value)
    }
}

impl From<Rc<Vec<Value>>> for Value {
    fn from(value: Rc<Vec<Value>>) -> Self {
        Value::List(value)
    }
}

impl From<ValueMap> for Value {
    fn from(value: ValueMap) -> Self {
        Value::Dict(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}

/// Conversion from a borrowed [`Value`] into a concrete Rust type.
pub trait FromValue: Sized {
    /// Returns `None` if the value has the wrong shape.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_int()
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_float()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FromValue for Vec<Value> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_list().map(<[Value]>::to_vec)
    }
}

impl FromValue for Vec<String> {
    fn from_value(value: &Value) -> Option<Self> {
        value
            .as_list()?
            .iter()
            .map(|item| item.as_str().map(str::to_owned))
            .collect()
    }
}

impl FromValue for ValueMap {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_dict().cloned()
    }
}

impl FromValue for Object {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_object().cloned()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::None => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A type that can be stored in a trait as an opaque [`Object`].
pub trait ObjectValue: Downcast + fmt::Debug {}
impl_downcast!(ObjectValue);

/// A shared reference to an opaque object, compared by identity.
#[derive(Clone)]
pub struct Object(Rc<dyn ObjectValue>);

impl Object {
    /// Wraps a value in a new shared object.
    pub fn new<T: ObjectValue>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Wraps an already shared value.
    pub fn from_rc<T: ObjectValue>(value: Rc<T>) -> Self {
        Self(value)
    }

    /// Returns `true` if the object is a `T`.
    pub fn is<T: ObjectValue>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Borrows the object as a `T`.
    pub fn downcast_ref<T: ObjectValue>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns a new shared handle to the object as a `T`.
    pub fn downcast_rc<T: ObjectValue>(&self) -> Option<Rc<T>> {
        self.0.clone().downcast_rc::<T>().ok()
    }

    /// The [`TypeId`](std::any::TypeId) of the concrete object.
    pub fn object_type_id(&self) -> std::any::TypeId {
        std::any::Any::type_id((*self.0).as_any())
    }

    /// Returns `true` if both handles point to the same object.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Object").field(&self.0).finish()
    }
}
