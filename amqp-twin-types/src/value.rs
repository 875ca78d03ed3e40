//! Scalar value type carried in application properties and message annotations

use std::fmt;

/// A scalar AMQP value.
///
/// The protocol layers in this crate only ever need to carry the handful of primitive
/// types that show up in twin properties and CBS application-properties: strings,
/// integers, booleans, and an explicit `null` (used for the `version` annotation on
/// `PATCH` requests, which must be present-but-null rather than absent).
#[derive(Debug, Clone, PartialEq)]
pub enum AmqpValue {
    /// UTF-8 string
    String(String),
    /// Signed 64-bit integer
    Int(i64),
    /// Boolean
    Bool(bool),
    /// Explicit null
    Null,
}

impl AmqpValue {
    /// Returns the value as a string slice if it is a [`AmqpValue::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmqpValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AmqpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmqpValue::String(s) => f.write_str(s),
            AmqpValue::Int(i) => write!(f, "{i}"),
            AmqpValue::Bool(b) => write!(f, "{b}"),
            AmqpValue::Null => f.write_str("null"),
        }
    }
}

impl From<&str> for AmqpValue {
    fn from(value: &str) -> Self {
        AmqpValue::String(value.to_string())
    }
}

impl From<String> for AmqpValue {
    fn from(value: String) -> Self {
        AmqpValue::String(value)
    }
}

impl From<i64> for AmqpValue {
    fn from(value: i64) -> Self {
        AmqpValue::Int(value)
    }
}

impl From<bool> for AmqpValue {
    fn from(value: bool) -> Self {
        AmqpValue::Bool(value)
    }
}
