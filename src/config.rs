//! Configuration for the bridge source and sink
//!
//! Both halves validate eagerly: a config that constructs successfully never
//! produces a configuration error later from the running state machine.
//! Durations are written in human form (`1s`, `500ms`) in TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Broker address used when none is configured
pub const DEFAULT_BROKER: &str = "tcp://127.0.0.1:1883";

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_TLS_PORT: u16 = 8883;

fn default_broker() -> String {
    DEFAULT_BROKER.to_string()
}

fn default_min_wait() -> Duration {
    Duration::from_secs(1)
}

fn default_max_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_reconnect_retries() -> i64 {
    10
}

fn default_payload_field() -> String {
    "payload".to_string()
}

fn default_topic_field() -> String {
    "topic".to_string()
}

fn default_qos_field() -> String {
    "qos".to_string()
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("invalid broker address '{addr}': {reason}")]
    InvalidBrokerAddress { addr: String, reason: &'static str },
    #[error("invalid field path '{0}'")]
    InvalidFieldPath(String),
    #[error("default_qos must be 0, 1 or 2, got {0}")]
    InvalidDefaultQos(u8),
    #[error("empty default topic is not supported")]
    EmptyDefaultTopic,
}

/// Inbound bridge configuration
///
/// `reconnect_retries` is the number of consecutive failures tolerated before
/// the source gives up; any negative value means retry forever.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Topic to subscribe to
    pub topic: String,
    /// Broker address, `scheme://host:port` or bare `host[:port]`
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// First reconnect wait after a failure
    #[serde(default = "default_min_wait", with = "humantime_serde")]
    pub reconnect_min_time: Duration,
    /// Ceiling for the doubling reconnect wait
    #[serde(default = "default_max_wait", with = "humantime_serde")]
    pub reconnect_max_time: Duration,
    #[serde(default = "default_reconnect_retries")]
    pub reconnect_retries: i64,
}

impl SourceConfig {
    /// Config for `topic` with every other option at its default.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            broker: default_broker(),
            user: None,
            password: None,
            reconnect_min_time: default_min_wait(),
            reconnect_max_time: default_max_wait(),
            reconnect_retries: default_reconnect_retries(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.is_empty() {
            return Err(ConfigError::MissingParameter("topic"));
        }
        if self.reconnect_min_time > self.reconnect_max_time {
            return Err(ConfigError::InvalidParameter {
                name: "reconnect_min_time",
                reason: format!(
                    "{:?} exceeds reconnect_max_time {:?}",
                    self.reconnect_min_time, self.reconnect_max_time
                ),
            });
        }
        normalize_broker_addr(&self.broker)?;
        Ok(())
    }

    pub fn broker_settings(&self) -> Result<BrokerSettings, ConfigError> {
        BrokerSettings::from_parts(&self.broker, self.user.clone(), self.password.clone())
    }
}

/// Outbound bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SinkConfig {
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Field path holding the payload of each record
    #[serde(default = "default_payload_field")]
    pub payload_field: String,
    /// Field path holding the target topic
    #[serde(default = "default_topic_field")]
    pub topic_field: String,
    /// Field path holding the per-record QoS level
    #[serde(default = "default_qos_field")]
    pub qos_field: String,
    /// Topic used when the topic field is absent from a record
    #[serde(default)]
    pub default_topic: Option<String>,
    /// QoS used when the qos field is absent from a record
    #[serde(default)]
    pub default_qos: u8,
    /// Publish messages with the retain flag set
    #[serde(default)]
    pub retained: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            user: None,
            password: None,
            payload_field: default_payload_field(),
            topic_field: default_topic_field(),
            qos_field: default_qos_field(),
            default_topic: None,
            default_qos: 0,
            retained: false,
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(topic) = &self.default_topic {
            if topic.is_empty() {
                return Err(ConfigError::EmptyDefaultTopic);
            }
        }
        if self.default_qos > 2 {
            return Err(ConfigError::InvalidDefaultQos(self.default_qos));
        }
        crate::record::FieldPath::parse(&self.payload_field)?;
        crate::record::FieldPath::parse(&self.topic_field)?;
        crate::record::FieldPath::parse(&self.qos_field)?;
        normalize_broker_addr(&self.broker)?;
        Ok(())
    }

    pub fn broker_settings(&self) -> Result<BrokerSettings, ConfigError> {
        BrokerSettings::from_parts(&self.broker, self.user.clone(), self.password.clone())
    }
}

/// Normalized connection options handed to the transport layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Address in `scheme://host:port` form
    pub addr: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BrokerSettings {
    fn from_parts(
        addr: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            addr: normalize_broker_addr(addr)?,
            username: username.filter(|u| !u.is_empty()),
            password,
        })
    }
}

/// Normalize a broker address to `scheme://host:port`.
///
/// A bare `host` or `host:port` gets the `tcp` scheme; a missing port gets
/// the scheme's default (1883, or 8883 for TLS schemes). An empty scheme,
/// empty host, or unparseable port is rejected.
pub fn normalize_broker_addr(addr: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &'static str| ConfigError::InvalidBrokerAddress {
        addr: addr.to_string(),
        reason,
    };

    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(invalid("address is empty"));
    }

    let (scheme, rest) = match trimmed.find("://") {
        Some(0) => return Err(invalid("scheme is empty")),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 3..]),
        None => ("tcp", trimmed),
    };

    let default_port = match scheme {
        "ssl" | "mqtts" | "tls" => DEFAULT_MQTT_TLS_PORT,
        _ => DEFAULT_MQTT_PORT,
    };

    let (host, port) = match rest.rfind(':') {
        Some(idx) => {
            let port = rest[idx + 1..]
                .parse::<u16>()
                .map_err(|_| invalid("port is missing or not a number"))?;
            (&rest[..idx], port)
        }
        None => (rest, default_port),
    };
    if host.is_empty() {
        return Err(invalid("host is missing"));
    }

    Ok(format!("{scheme}://{host}:{port}"))
}

/// TOML file shape for the command line bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub source: Option<SourceConfig>,
    #[serde(default)]
    pub sink: Option<SinkConfig>,
}

impl BridgeConfig {
    /// Load and validate a bridge configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.is_none() && self.sink.is_none() {
            return Err(ConfigError::MissingParameter("source or sink"));
        }
        if let Some(source) = &self.source {
            source.validate()?;
        }
        if let Some(sink) = &self.sink {
            sink.validate()?;
        }
        Ok(())
    }
}
