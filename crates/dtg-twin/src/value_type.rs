use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dynamic type expected from a handler result or declared for a named
/// parameter.
///
/// `Any` accepts everything. `Integer` and `Float` are distinct so that a
/// declared integer parameter rejects fractional input instead of silently
/// truncating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Any,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ValueType {
    /// Structural assignability check. `Value::Null` is assignable to every
    /// type; absence is handled by the null policies, not here.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (ValueType::Any, _) => true,
            (ValueType::Bool, Value::Bool(_)) => true,
            (ValueType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ValueType::Float, Value::Number(_)) => true,
            (ValueType::String, Value::String(_)) => true,
            (ValueType::Array, Value::Array(_)) => true,
            (ValueType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }

    /// Best-effort conversion of `value` to this type. Returns `None` when
    /// no sensible conversion exists; the caller decides whether that is an
    /// error.
    ///
    /// Conversions: strings parse to numbers and bools, numbers render to
    /// strings, non-zero numbers are truthy, and scalars wrap into
    /// single-element arrays.
    pub fn coerce(&self, value: Value) -> Option<Value> {
        if self.matches(&value) {
            return Some(value);
        }
        match self {
            ValueType::Any => Some(value),
            ValueType::Bool => match value {
                Value::Number(n) => Some(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
                Value::String(s) => match s.trim() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            ValueType::Integer => match value {
                Value::Number(n) => {
                    // Fractional input is rejected rather than truncated.
                    let f = n.as_f64()?;
                    (f.fract() == 0.0).then(|| Value::from(f as i64))
                }
                Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
                Value::Bool(b) => Some(Value::from(b as i64)),
                _ => None,
            },
            ValueType::Float => match value {
                Value::String(s) => s.trim().parse::<f64>().ok().and_then(|f| {
                    serde_json::Number::from_f64(f).map(Value::Number)
                }),
                Value::Bool(b) => Some(Value::from(if b { 1.0 } else { 0.0 })),
                _ => None,
            },
            ValueType::String => match value {
                Value::Number(n) => Some(Value::String(n.to_string())),
                Value::Bool(b) => Some(Value::String(b.to_string())),
                _ => None,
            },
            ValueType::Array => Some(Value::Array(vec![value])),
            ValueType::Object => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Any => "any",
            ValueType::Bool => "bool",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
        };
        f.write_str(name)
    }
}
