//! Bidirectional bridge between streaming pipelines and MQTT brokers
//!
//! # Overview
//!
//! This crate provides the two halves of an MQTT bridge:
//!
//! - [`MqttSource`] keeps a persistent, self-healing subscription to a broker
//!   topic and hands every message to a [`source::RecordWriter`] as an
//!   [`InboundRecord`]. Connection loss is absorbed with bounded exponential
//!   backoff; a [`source::StopHandle`] shuts the loop down gracefully from
//!   any task, at any point of the lifecycle.
//! - [`MqttSink`] publishes pipeline records, deriving topic, payload bytes,
//!   and QoS per record from configurable field paths.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use mqtt_bridge::config::SourceConfig;
//! use mqtt_bridge::record::InboundRecord;
//! use mqtt_bridge::source::{MqttSource, RecordWriter};
//!
//! struct PrintWriter;
//!
//! #[async_trait::async_trait]
//! impl RecordWriter for PrintWriter {
//!     async fn write(
//!         &self,
//!         record: InboundRecord,
//!     ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         println!("{}: {} bytes", record.topic, record.payload.len());
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let mut source = MqttSource::new(SourceConfig::new("sensors/#"))?;
//! let stop = source.stop_handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     stop.request_stop();
//! });
//! source.run(PrintWriter).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod record;
pub mod signal;
pub mod sink;
pub mod source;
pub mod testing;
pub mod transport;

pub use config::{BridgeConfig, SinkConfig, SourceConfig};
pub use error::{BridgeError, BridgeResult};
pub use record::{InboundRecord, Value};
pub use sink::MqttSink;
pub use source::{MqttSource, StopHandle};
