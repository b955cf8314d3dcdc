//! Crate-wide error type
//!
//! Each layer defines its own error enum; [`BridgeError`] aggregates them for
//! callers that drive a whole source or sink.

use crate::config::ConfigError;
use crate::sink::RecordError;
use crate::transport::BrokerError;
use thiserror::Error;

/// Error returned from source and sink operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid or missing configuration, raised at construction only
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Broker-side failure (connect, subscribe, publish)
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A record presented to the sink could not be mapped
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// The inbound reconnect ceiling was exceeded; the source run is over
    #[error("gave up connecting to MQTT broker after {attempts} failures")]
    RetriesExhausted { attempts: u64 },
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
