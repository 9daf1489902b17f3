//! Structured replacement for the source's pickling-JSON bridge (SPEC_FULL.md §4.B, §9).
//!
//! `args`/`kwargs` are typed as `Value`s rather than arbitrary host-language objects;
//! this loses the ability to smuggle opaque Python instances through the wire format
//! but keeps a lossless, self-describing JSON form for everything that actually shows
//! up in task arguments: primitives, timestamps, durations, and nested containers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool { value: bool },
    Int { value: i64 },
    Float { value: f64 },
    Text { value: String },
    /// Milliseconds since the Unix epoch, UTC.
    Timestamp { value: DateTime<Utc> },
    /// Milliseconds, matching the wire duration form used elsewhere (SPEC_FULL.md §6).
    Duration { millis: i64 },
    List { items: Vec<Value> },
    Map { entries: BTreeMap<String, Value> },
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text { value: s.into() }
    }

    pub fn int(v: i64) -> Self {
        Value::Int { value: v }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text { value } => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int { value } => Some(*value),
            _ => None,
        }
    }
}

/// Ordered positional arguments.
pub type Args = Vec<Value>;
/// Keyword arguments.
pub type Kwargs = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let values = vec![
            Value::Null,
            Value::Bool { value: true },
            Value::int(42),
            Value::Float { value: 1.5 },
            Value::text("hello"),
        ];
        for v in values {
            let json = serde_json::to_string(&v).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(v, back);
        }
    }

    #[test]
    fn round_trips_nested_containers() {
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), Value::int(1));
        entries.insert(
            "b".to_string(),
            Value::List {
                items: vec![Value::text("x"), Value::Bool { value: false }],
            },
        );
        let v = Value::Map { entries };
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn round_trips_timestamp_and_duration() {
        let v = Value::Timestamp { value: Utc::now() };
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);

        let d = Value::Duration { millis: 90_000 };
        let json = serde_json::to_string(&d).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
