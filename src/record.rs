//! Record types exchanged with the host pipeline
//!
//! Inbound messages become [`InboundRecord`]s with the raw payload attached as
//! a blob. Outbound records are represented as [`Value`] trees so the sink can
//! resolve payload, topic, and QoS fields without committing to a concrete
//! host record type.

use crate::config::ConfigError;
use bytes::Bytes;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// One message received from the broker, handed to the downstream writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    /// Topic the message was published on
    pub topic: String,
    /// Raw message payload, untouched
    pub payload: Bytes,
}

impl InboundRecord {
    /// View the record as a `Value` map with `topic` and `payload` entries.
    pub fn to_value(&self) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("topic".to_string(), Value::String(self.topic.clone()));
        fields.insert("payload".to_string(), Value::Blob(self.payload.clone()));
        Value::Map(fields)
    }
}

/// Dynamically typed record value
///
/// The subset of types a streaming pipeline record can carry. Binary payloads
/// are first-class (`Blob`) so inbound bytes survive a round trip without
/// re-encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Blob(Bytes),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Kind of a [`Value`], used in error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Blob,
    Array,
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Blob => "blob",
            ValueKind::Array => "array",
            ValueKind::Map => "map",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Blob(_) => ValueKind::Blob,
            Value::Array(_) => ValueKind::Array,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// Walk a compiled field path into nested maps.
    ///
    /// Returns `None` if any segment is missing or an intermediate value is
    /// not a map.
    pub fn lookup(&self, path: &FieldPath) -> Option<&Value> {
        let mut current = self;
        for segment in path.segments() {
            match current {
                Value::Map(fields) => current = fields.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::String(s) => serializer.serialize_str(s),
            Value::Blob(bytes) => serializer.serialize_bytes(bytes),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

/// A field path compiled from a dot-separated name like `meta.topic`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Compile a dot-separated path. Empty paths and empty segments are
    /// configuration errors.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        if raw.is_empty() {
            return Err(ConfigError::InvalidFieldPath(raw.to_string()));
        }
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(ConfigError::InvalidFieldPath(raw.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Value {
        let mut meta = BTreeMap::new();
        meta.insert("topic".to_string(), Value::from("a/b"));
        let mut fields = BTreeMap::new();
        fields.insert("meta".to_string(), Value::Map(meta));
        fields.insert("payload".to_string(), Value::from("hello"));
        fields.insert("qos".to_string(), Value::from(1));
        Value::Map(fields)
    }

    #[test]
    fn lookup_top_level_field() {
        let path = FieldPath::parse("payload").unwrap();
        assert_eq!(record().lookup(&path), Some(&Value::from("hello")));
    }

    #[test]
    fn lookup_nested_field() {
        let path = FieldPath::parse("meta.topic").unwrap();
        assert_eq!(record().lookup(&path), Some(&Value::from("a/b")));
    }

    #[test]
    fn lookup_missing_field_is_none() {
        let path = FieldPath::parse("nope").unwrap();
        assert_eq!(record().lookup(&path), None);
    }

    #[test]
    fn lookup_through_non_map_is_none() {
        let path = FieldPath::parse("payload.inner").unwrap();
        assert_eq!(record().lookup(&path), None);
    }

    #[test]
    fn field_path_rejects_empty_and_degenerate_forms() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse(".a").is_err());
        assert!(FieldPath::parse("a.").is_err());
    }

    #[test]
    fn value_serializes_to_canonical_json() {
        let json = serde_json::to_string(&record()).unwrap();
        assert_eq!(
            json,
            r#"{"meta":{"topic":"a/b"},"payload":"hello","qos":1}"#
        );
    }

    #[test]
    fn blob_serializes_as_byte_array() {
        let value = Value::Blob(Bytes::from_static(b"\x01\x02"));
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "[1,2]");
    }

    #[test]
    fn from_json_preserves_structure() {
        let json: serde_json::Value = serde_json::json!({"x": 1, "y": [true, null], "z": 1.5});
        let value = Value::from(json);
        let Value::Map(fields) = &value else {
            panic!("expected map");
        };
        assert_eq!(fields["x"], Value::Int(1));
        assert_eq!(
            fields["y"],
            Value::Array(vec![Value::Bool(true), Value::Null])
        );
        assert_eq!(fields["z"], Value::Float(1.5));
    }

    #[test]
    fn inbound_record_to_value() {
        let record = InboundRecord {
            topic: "sensors/a".to_string(),
            payload: Bytes::from_static(b"42"),
        };
        let value = record.to_value();
        let topic = value.lookup(&FieldPath::parse("topic").unwrap());
        assert_eq!(topic.and_then(Value::as_str), Some("sensors/a"));
    }
}
