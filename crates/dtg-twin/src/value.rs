use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_wallclock_ns() -> u64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// A resource value paired with its observation timestamp.
///
/// Both parts are optional: handlers may return a bare value (the dispatcher
/// stamps it), and the empty form is the "do not touch the twin" marker used
/// by the null-handling policies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    pub value: Option<Value>,
    /// Wall-clock nanoseconds since the Unix epoch.
    pub timestamp: Option<u64>,
}

impl TimedValue {
    /// No-op marker: no value, no timestamp.
    pub const EMPTY: TimedValue = TimedValue {
        value: None,
        timestamp: None,
    };

    pub fn new(value: Value, timestamp: u64) -> Self {
        Self {
            value: Some(value),
            timestamp: Some(timestamp),
        }
    }

    /// Value-less but timestamped, as produced by the `Update` null policy.
    pub fn empty_at(timestamp: u64) -> Self {
        Self {
            value: None,
            timestamp: Some(timestamp),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.timestamp.is_none()
    }
}
