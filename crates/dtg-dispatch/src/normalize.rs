//! Turns a raw handler result into the value the twin will hold, applying
//! the expected-type check, timestamp stamping, and the record's
//! null-handling policy.

use dtg_twin::{ResourceKey, TimedValue, ValueType};
use serde_json::Value;

use crate::error::DispatchError;
use crate::handler::{HandlerResult, NullAction};

/// Outcome of normalization: either a value to commit to the twin, or a
/// value to hand back to the caller without touching the twin.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Resolve the request with this value; skip the twin commit.
    Skip(TimedValue),
    /// Commit this value to the twin, then resolve with it.
    Commit(TimedValue),
}

impl Normalized {
    pub fn into_value(self) -> TimedValue {
        match self {
            Normalized::Skip(tv) | Normalized::Commit(tv) => tv,
        }
    }
}

/// Normalize `raw` against the resource's expected type and null policy.
///
/// Bare values are stamped with `now`; explicitly timed values keep their
/// timestamp, with `now` filling in only when the handler left it out. An
/// absent result takes the `on_null` path.
pub fn normalize_result(
    key: &ResourceKey,
    raw: HandlerResult,
    expected: ValueType,
    cached: &TimedValue,
    on_null: NullAction,
    now: u64,
) -> Result<Normalized, DispatchError> {
    match raw {
        HandlerResult::Value(value) => {
            check_type(key, expected, &value)?;
            Ok(Normalized::Commit(TimedValue::new(value, now)))
        }
        HandlerResult::Timed(tv) => {
            if let Some(value) = &tv.value {
                check_type(key, expected, value)?;
            }
            let timestamp = tv.timestamp.unwrap_or(now);
            Ok(Normalized::Commit(TimedValue {
                value: tv.value,
                timestamp: Some(timestamp),
            }))
        }
        HandlerResult::None => Ok(match on_null {
            NullAction::Ignore => Normalized::Skip(TimedValue::EMPTY),
            NullAction::Update => Normalized::Commit(TimedValue::empty_at(now)),
            NullAction::UpdateIfPresent => {
                if cached.timestamp.is_some() {
                    Normalized::Commit(TimedValue::empty_at(now))
                } else {
                    Normalized::Skip(TimedValue::EMPTY)
                }
            }
        }),
    }
}

fn check_type(key: &ResourceKey, expected: ValueType, value: &Value) -> Result<(), DispatchError> {
    if expected.matches(value) {
        Ok(())
    } else {
        Err(DispatchError::InvalidResultType {
            key: key.clone(),
            expected,
            actual: json_type_name(value),
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
