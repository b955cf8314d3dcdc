//! Broker transport layer
//!
//! The bridge drives brokers through the [`BrokerClient`] trait so the
//! lifecycle machinery can be exercised against mocks. A handle is single
//! use: it is connected once, and after its connection dies it is replaced
//! through [`BrokerConnector::fresh_handle`] rather than revived. The loss
//! hook registered with [`BrokerClient::on_connection_lost`] is scoped to one
//! handle and fires at most once.

use crate::signal::SignalMailbox;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

pub use mqtt::{MqttBrokerClient, MqttConnector};
pub use rumqttc::v5::mqttbytes::QoS;

/// Broker-reported transport errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("subscribe failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("publish failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("invalid broker address: {0}")]
    InvalidBrokerAddress(String),
    #[error("broker event channel closed")]
    ChannelClosed,
}

/// Receives messages delivered on an active subscription.
///
/// Called from the broker client's own delivery task; a slow implementation
/// slows delivery of further messages, which is the intended backpressure.
#[async_trait::async_trait]
pub trait InboundHandler: Send + Sync {
    async fn deliver(&self, topic: String, payload: Bytes);
}

/// One broker connection handle
#[async_trait::async_trait]
pub trait BrokerClient: Send {
    /// Establish the connection, waiting at most `limit` for the broker to
    /// acknowledge it.
    async fn connect(&mut self, limit: Duration) -> Result<(), BrokerError>;

    /// Subscribe and wait at most `limit` for confirmation. Messages for the
    /// subscription are delivered to `handler`.
    async fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
        handler: Arc<dyn InboundHandler>,
        limit: Duration,
    ) -> Result<(), BrokerError>;

    /// Publish one message, surfacing broker-reported failure. Callers are
    /// expected to serialize publishes on one handle.
    async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError>;

    /// Tear the connection down, allowing in-flight work up to `grace` to
    /// finish. Never fails; a dead or never-connected handle disconnects as a
    /// no-op. Disarms the loss hook: a deliberate disconnect is not a loss.
    async fn disconnect(&mut self, grace: Duration);

    fn is_connected(&self) -> bool;

    /// Arm the one-shot loss notification for this handle. If the connection
    /// is already dead at registration time the mailbox is notified
    /// immediately, so a loss can never fall between subscribe and arming.
    fn on_connection_lost(&mut self, signals: SignalMailbox);
}

/// Allocates fresh handles bound to fixed connection options
pub trait BrokerConnector: Send + Sync {
    type Handle: BrokerClient + Send + 'static;

    fn fresh_handle(&self) -> Self::Handle;
}
