//! Outbound bridge: publishes pipeline records to an MQTT broker
//!
//! The sink owns a single broker handle for its whole life. Writes while the
//! connection is down are deliberately silent no-ops: the bridge drops
//! messages rather than failing the pipeline while the broker is unreachable.
//! Mapping errors and broker-reported publish failures are surfaced
//! per record.

use crate::config::SinkConfig;
use crate::error::BridgeResult;
use crate::record::Value;
use crate::transport::{BrokerClient, BrokerConnector, MqttBrokerClient, MqttConnector};
use std::time::Duration;
use tracing::{debug, info};

mod mapper;

pub use mapper::{FieldMapping, OutboundMessage, RecordError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// The outbound bridge
pub struct MqttSink<H: BrokerClient = MqttBrokerClient> {
    handle: H,
    mapping: FieldMapping,
    retained: bool,
}

impl MqttSink<MqttBrokerClient> {
    /// Validate `config` and connect to the broker.
    pub async fn connect(config: SinkConfig) -> BridgeResult<Self> {
        config.validate()?;
        let connector = MqttConnector::new(config.broker_settings()?)?;
        let mut handle = connector.fresh_handle();
        handle.connect(CONNECT_TIMEOUT).await?;
        info!(broker = %config.broker, "outbound bridge connected");
        Self::with_handle(handle, &config)
    }
}

impl<H: BrokerClient> MqttSink<H> {
    /// Wrap an already-connected handle (mocks in tests).
    pub fn with_handle(handle: H, config: &SinkConfig) -> BridgeResult<Self> {
        config.validate()?;
        Ok(Self {
            handle,
            mapping: FieldMapping::from_config(config)?,
            retained: config.retained,
        })
    }

    /// Publish one record.
    ///
    /// Succeeds silently without publishing when the connection is down.
    pub async fn write(&mut self, record: &Value) -> BridgeResult<()> {
        if !self.handle.is_connected() {
            debug!("sink is disconnected; dropping record");
            return Ok(());
        }

        let message = self.mapping.resolve(record)?;
        self.handle
            .publish(&message.topic, message.qos, self.retained, message.payload)
            .await?;
        Ok(())
    }

    /// Disconnect with a short grace period. Always succeeds locally.
    pub async fn close(&mut self) {
        self.handle.disconnect(DISCONNECT_GRACE).await;
        info!("outbound bridge closed");
    }
}
