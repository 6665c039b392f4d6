//! Typed literal values bound to predicates.
//!
//! Raw workload and sample documents arrive as JSON, possibly carrying
//! MongoDB Extended JSON wrappers (`{"$numberLong": "42"}`, `{"$date": ...}`).
//! They are decoded once into [`Value`]; comparisons follow MongoDB type
//! bracketing, so values from different type families never compare.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value as JsonValue};
use std::cmp::Ordering;
use std::fmt;

/// Data values
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Milliseconds since the Unix epoch
    DateTime(i64),
    ObjectId(String),
    Regex { pattern: String, options: String },
    Array(Vec<Value>),
    /// Embedded document, keys in document order
    Document(Vec<(String, Value)>),
}

impl Value {
    /// Decode a JSON value, unwrapping Extended JSON literals.
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::Number(n) => Self::from_number(n),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Self::extended_literal(map).unwrap_or_else(|| {
                Value::Document(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect(),
                )
            }),
        }
    }

    /// Recognise a single-key Extended JSON wrapper. Returns `None` for any
    /// other object, including operator documents.
    pub fn extended_literal(map: &Map<String, JsonValue>) -> Option<Self> {
        if map.len() != 1 {
            return None;
        }
        let (key, inner) = map.iter().next()?;
        match key.as_str() {
            "$numberInt" | "$numberLong" => match inner {
                JsonValue::String(s) => s.parse::<i64>().ok().map(Value::Integer),
                JsonValue::Number(n) => n.as_i64().map(Value::Integer),
                _ => None,
            },
            "$numberDouble" | "$numberDecimal" => match inner {
                JsonValue::String(s) => s.parse::<f64>().ok().map(Value::Float),
                JsonValue::Number(n) => n.as_f64().map(Value::Float),
                _ => None,
            },
            "$date" => Self::parse_date(inner).map(Value::DateTime),
            "$oid" => inner.as_str().map(|s| Value::ObjectId(s.to_string())),
            "$timestamp" => {
                let secs = inner.get("t")?.as_i64()?;
                Some(Value::DateTime(secs.saturating_mul(1000)))
            }
            "$regularExpression" => {
                let pattern = inner.get("pattern")?.as_str()?.to_string();
                let options = inner
                    .get("options")
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some(Value::Regex { pattern, options })
            }
            _ => None,
        }
    }

    fn from_number(n: &Number) -> Self {
        if let Some(i) = n.as_i64() {
            Value::Integer(i)
        } else {
            Value::Float(n.as_f64().unwrap_or(f64::NAN))
        }
    }

    fn parse_date(inner: &JsonValue) -> Option<i64> {
        match inner {
            JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.timestamp_millis()),
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::Object(map) => match Self::extended_literal(map)? {
                Value::Integer(ms) => Some(ms),
                _ => None,
            },
            _ => None,
        }
    }

    /// Render as relaxed Extended JSON.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Integer(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => match Number::from_f64(*f) {
                Some(n) => JsonValue::Number(n),
                None => serde_json::json!({ "$numberDouble": f.to_string() }),
            },
            Value::String(s) => JsonValue::String(s.clone()),
            Value::DateTime(ms) => match DateTime::<Utc>::from_timestamp_millis(*ms) {
                Some(dt) => {
                    serde_json::json!({ "$date": dt.to_rfc3339_opts(SecondsFormat::Millis, true) })
                }
                None => serde_json::json!({ "$date": { "$numberLong": ms.to_string() } }),
            },
            Value::ObjectId(oid) => serde_json::json!({ "$oid": oid }),
            Value::Regex { pattern, options } => serde_json::json!({
                "$regularExpression": { "pattern": pattern, "options": options }
            }),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Document(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "long",
            Value::Float(_) => "double",
            Value::String(_) => "string",
            Value::DateTime(_) => "date",
            Value::ObjectId(_) => "objectId",
            Value::Regex { .. } => "regex",
            Value::Array(_) => "array",
            Value::Document(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Order two values of the same type family. Different families are
    /// incomparable and yield `None`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::ObjectId(a), Value::ObjectId(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality with numeric widening, recursing into arrays and documents.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (Value::Document(a), Value::Document(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loosely_equals(vb))
            }
            (Value::Regex { pattern: pa, options: oa }, Value::Regex { pattern: pb, options: ob }) => {
                pa == pb && oa == ob
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<&JsonValue> for Value {
    fn from(json: &JsonValue) -> Self {
        Value::from_json(json)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
