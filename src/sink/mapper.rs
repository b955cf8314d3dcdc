//! Per-record field resolution for the outbound bridge

use crate::config::{ConfigError, SinkConfig};
use crate::record::{FieldPath, Value, ValueKind};
use crate::transport::QoS;
use thiserror::Error;

/// Errors raised while mapping one record to a publishable message
///
/// Local to the offending record: they never affect other records or the
/// broker connection.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("payload field '{path}' is missing")]
    PayloadFieldMissing { path: String },
    #[error("value of kind {kind} at '{path}' cannot be used as payload")]
    UnsupportedPayloadType { path: String, kind: ValueKind },
    #[error("topic field '{path}' is missing and no default topic is configured")]
    TopicFieldMissing { path: String },
    #[error("expected {expected} at '{path}', got {found}")]
    TypeMismatch {
        path: String,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("QoS must be 0, 1 or 2, got {value}")]
    InvalidQos { value: i64 },
    #[error("failed to encode structured payload: {0}")]
    PayloadEncoding(#[from] serde_json::Error),
}

/// Everything needed to publish one record
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Compiled field paths and defaults of one sink
#[derive(Debug, Clone)]
pub struct FieldMapping {
    payload: FieldPath,
    topic: FieldPath,
    qos: FieldPath,
    default_topic: Option<String>,
    default_qos: QoS,
}

impl FieldMapping {
    /// Compile the sink's field paths; assumes `config` has been validated.
    pub fn from_config(config: &SinkConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            payload: FieldPath::parse(&config.payload_field)?,
            topic: FieldPath::parse(&config.topic_field)?,
            qos: FieldPath::parse(&config.qos_field)?,
            default_topic: config.default_topic.clone(),
            default_qos: qos_from_level(i64::from(config.default_qos))
                .ok_or(ConfigError::InvalidDefaultQos(config.default_qos))?,
        })
    }

    /// Resolve topic, payload bytes, and QoS for one record.
    pub fn resolve(&self, record: &Value) -> Result<OutboundMessage, RecordError> {
        Ok(OutboundMessage {
            topic: self.resolve_topic(record)?,
            payload: self.resolve_payload(record)?,
            qos: self.resolve_qos(record)?,
        })
    }

    fn resolve_payload(&self, record: &Value) -> Result<Vec<u8>, RecordError> {
        let value = record
            .lookup(&self.payload)
            .ok_or_else(|| RecordError::PayloadFieldMissing {
                path: self.payload.to_string(),
            })?;
        match value {
            // Strings and blobs pass through byte for byte; only structured
            // values go through an encoding step.
            Value::String(s) => Ok(s.clone().into_bytes()),
            Value::Blob(bytes) => Ok(bytes.to_vec()),
            Value::Array(_) | Value::Map(_) => Ok(serde_json::to_vec(value)?),
            other => Err(RecordError::UnsupportedPayloadType {
                path: self.payload.to_string(),
                kind: other.kind(),
            }),
        }
    }

    fn resolve_topic(&self, record: &Value) -> Result<String, RecordError> {
        match record.lookup(&self.topic) {
            Some(Value::String(topic)) => Ok(topic.clone()),
            Some(other) => Err(RecordError::TypeMismatch {
                path: self.topic.to_string(),
                expected: ValueKind::String,
                found: other.kind(),
            }),
            None => self
                .default_topic
                .clone()
                .ok_or_else(|| RecordError::TopicFieldMissing {
                    path: self.topic.to_string(),
                }),
        }
    }

    fn resolve_qos(&self, record: &Value) -> Result<QoS, RecordError> {
        match record.lookup(&self.qos) {
            Some(Value::Int(level)) => {
                qos_from_level(*level).ok_or(RecordError::InvalidQos { value: *level })
            }
            Some(other) => Err(RecordError::TypeMismatch {
                path: self.qos.to_string(),
                expected: ValueKind::Int,
                found: other.kind(),
            }),
            None => Ok(self.default_qos),
        }
    }
}

fn qos_from_level(level: i64) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}
