//! Inbound bridge: a self-healing MQTT subscription feeding a record writer
//!
//! [`MqttSource::run`] owns the connection lifecycle:
//!
//! ```text
//! Idle -> Connecting -> Subscribing -> Active -> (Lost | Stopping)
//!            ^                                        |
//!            +------- backoff, fresh handle ----------+
//! ```
//!
//! Connect and subscribe waits are bounded, the backoff sleep and the Active
//! wait race the lifecycle mailbox, and a stop request observed at any of
//! those points wins over a concurrent connection loss. Every retry drives a
//! fresh broker handle because the loss notification is one-shot per handle.

use crate::config::SourceConfig;
use crate::error::BridgeResult;
use crate::record::InboundRecord;
use crate::signal::{LifecycleSignal, SignalMailbox};
use crate::transport::{
    BrokerClient, BrokerConnector, InboundHandler, MqttConnector, QoS,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod backoff;

pub use backoff::Backoff;

/// Budget for one connect or subscribe attempt
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
/// Grace given to the broker client on a deliberate shutdown
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Downstream destination for inbound records.
///
/// Called synchronously from the broker client's delivery task: records are
/// handed over in arrival order with no intermediate buffering, so a blocking
/// writer blocks further delivery.
#[async_trait::async_trait]
pub trait RecordWriter: Send + Sync {
    async fn write(
        &self,
        record: InboundRecord,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Converts broker messages into records for the writer
pub struct RecordEmitter<W> {
    writer: W,
}

impl<W> RecordEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait::async_trait]
impl<W: RecordWriter> InboundHandler for RecordEmitter<W> {
    async fn deliver(&self, topic: String, payload: Bytes) {
        let record = InboundRecord { topic, payload };
        if let Err(err) = self.writer.write(record).await {
            // A rejected record is the writer's problem; the subscription
            // stays up.
            warn!(error = %err, "downstream writer rejected record");
        }
    }
}

/// Requests a graceful stop of a running [`MqttSource`].
///
/// Cloneable and idempotent; safe to call from any task at any point of the
/// source lifecycle, including before the first connection attempt.
#[derive(Clone)]
pub struct StopHandle {
    signals: SignalMailbox,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.signals.request_stop();
    }
}

/// The inbound bridge
pub struct MqttSource<C: BrokerConnector = MqttConnector> {
    config: SourceConfig,
    connector: C,
    signals: SignalMailbox,
}

impl MqttSource<MqttConnector> {
    /// Validate `config` and build a source talking to a real broker.
    pub fn new(config: SourceConfig) -> BridgeResult<Self> {
        config.validate()?;
        let connector = MqttConnector::new(config.broker_settings()?)?;
        Self::with_connector(config, connector)
    }
}

impl<C: BrokerConnector> MqttSource<C> {
    /// Build a source over an arbitrary connector (mocks in tests).
    pub fn with_connector(config: SourceConfig, connector: C) -> BridgeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            signals: SignalMailbox::new(),
        })
    }

    /// Handle for stopping this source from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            signals: self.signals.clone(),
        }
    }

    /// Drive the subscription until stopped or out of retries.
    ///
    /// Returns `Ok(())` after a requested stop and `RetriesExhausted` when a
    /// finite retry ceiling is exceeded; broker failures below the ceiling
    /// are absorbed by backoff.
    pub async fn run<W>(&mut self, writer: W) -> BridgeResult<()>
    where
        W: RecordWriter + 'static,
    {
        let emitter = Arc::new(RecordEmitter::new(writer));
        let mut backoff = Backoff::new(
            self.config.reconnect_min_time,
            self.config.reconnect_max_time,
            self.config.reconnect_retries,
        );
        let mut handle = self.connector.fresh_handle();

        loop {
            // Wait out the backoff, unless a signal cuts it short. The stop
            // arm is polled first so a stop requested before run() is
            // honored without touching the network.
            tokio::select! {
                biased;
                signal = self.signals.recv() => match signal {
                    LifecycleSignal::Stopped => {
                        info!("stop requested; shutting down inbound bridge");
                        return Ok(());
                    }
                    // A stale loss just means the previous handle is already
                    // gone; go straight to the next attempt.
                    LifecycleSignal::Lost => {}
                },
                _ = tokio::time::sleep(backoff.current_wait()) => {}
            }

            info!(broker = %self.config.broker, "connecting to MQTT broker");
            if let Err(err) = handle.connect(ATTEMPT_TIMEOUT).await {
                let wait = self.grow_backoff(&mut backoff)?;
                warn!(error = %err, wait = ?wait, "failed to connect to MQTT broker");
                handle.disconnect(Duration::ZERO).await;
                handle = self.connector.fresh_handle();
                continue;
            }

            if let Err(err) = handle
                .subscribe(
                    &self.config.topic,
                    QoS::AtMostOnce,
                    emitter.clone(),
                    ATTEMPT_TIMEOUT,
                )
                .await
            {
                let wait = self.grow_backoff(&mut backoff)?;
                warn!(
                    error = %err,
                    topic = %self.config.topic,
                    wait = ?wait,
                    "failed to subscribe to topic"
                );
                // Discard the half-open handle; the loss notification only
                // fires once per handle, so the next attempt needs its own.
                handle.disconnect(Duration::ZERO).await;
                handle = self.connector.fresh_handle();
                continue;
            }

            backoff.reset();
            handle.on_connection_lost(self.signals.clone());
            info!(topic = %self.config.topic, "subscribed; bridging messages");

            match self.signals.recv().await {
                LifecycleSignal::Stopped => {
                    handle.disconnect(DISCONNECT_GRACE).await;
                    info!("stop requested; inbound bridge shut down");
                    return Ok(());
                }
                LifecycleSignal::Lost => {
                    warn!(broker = %self.config.broker, "lost connection to MQTT broker");
                    // The network layer already tore the old handle down.
                    handle = self.connector.fresh_handle();
                }
            }
        }
    }

    fn grow_backoff(&self, backoff: &mut Backoff) -> BridgeResult<Duration> {
        backoff.advance().map_err(|err| {
            error!(error = %err, "giving up on MQTT broker");
            err
        })
    }
}
