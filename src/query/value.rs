//! Attribute values read from repository objects.
//!
//! Filters compare values by their string form, so every variant knows how to
//! render itself. Object-valued attributes render as the referenced object's
//! identity string, which only the repository can resolve.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::repository::ObjectRef;

/// Typed attribute value tagged with explicit type information.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Reference to another repository object.
    Object(ObjectRef),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders a scalar value the way filters compare it.
    ///
    /// Returns `None` for nulls and object references; the latter must be
    /// resolved to an identity string through the repository.
    pub fn scalar_string(&self) -> Option<String> {
        match self {
            Value::Null | Value::Object(_) => None,
            Value::Bool(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::String(v) => Some(v.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Object(obj) => write!(f, "@{obj}"),
            other => match other.scalar_string() {
                Some(s) => write!(f, "{s}"),
                None => Ok(()),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
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
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}
