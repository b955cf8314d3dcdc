//! rumqttc-backed broker client
//!
//! Each [`MqttBrokerClient`] owns one rumqttc client/event-loop pair. The
//! event loop runs on a spawned task that publishes link state over a watch
//! channel; `connect` and `subscribe` wait on that state with a bounded
//! timeout. When the link dies the task fires the armed loss hook exactly
//! once and exits — recovery is the caller's job, with a fresh handle.

use super::{BrokerClient, BrokerConnector, BrokerError, InboundHandler, QoS};
use crate::config::BrokerSettings;
use crate::signal::SignalMailbox;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::Transport as WireTransport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of the rumqttc request queue
const REQUEST_QUEUE_CAP: usize = 10;

/// State of one handle's network link
#[derive(Debug, Clone, PartialEq)]
enum LinkState {
    Connecting,
    Connected,
    Closed(String),
}

/// Builds fresh [`MqttBrokerClient`] handles for one broker
pub struct MqttConnector {
    host: String,
    port: u16,
    tls: bool,
    username: Option<String>,
    password: Option<String>,
    handle_seq: AtomicU64,
}

impl MqttConnector {
    /// Parse the normalized address in `settings` and keep the pieces needed
    /// to mint handles.
    pub fn new(settings: BrokerSettings) -> Result<Self, BrokerError> {
        let url = url::Url::parse(&settings.addr)
            .map_err(|_| BrokerError::InvalidBrokerAddress(settings.addr.clone()))?;
        let host = url
            .host_str()
            .ok_or_else(|| BrokerError::InvalidBrokerAddress(settings.addr.clone()))?
            .to_string();
        let tls = matches!(url.scheme(), "ssl" | "mqtts" | "tls");
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(Self {
            host,
            port,
            tls,
            username: settings.username,
            password: settings.password,
            handle_seq: AtomicU64::new(0),
        })
    }

    /// Broker options for the next handle. Client ids are unique per handle
    /// so a reconnect never collides with the broker-side ghost of its
    /// predecessor.
    fn options(&self) -> MqttOptions {
        let seq = self.handle_seq.fetch_add(1, Ordering::Relaxed);
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let client_id = format!("bridge-{stamp}-{seq}");

        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        if self.tls {
            options.set_transport(WireTransport::tls_with_default_config());
        }
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        options.set_keep_alive(Duration::from_secs(60));
        options
    }
}

impl BrokerConnector for MqttConnector {
    type Handle = MqttBrokerClient;

    fn fresh_handle(&self) -> MqttBrokerClient {
        MqttBrokerClient::new(self.options())
    }
}

/// One rumqttc connection handle
pub struct MqttBrokerClient {
    client: AsyncClient,
    event_loop: Option<EventLoop>,
    task: Option<JoinHandle<()>>,
    link_rx: Option<watch::Receiver<LinkState>>,
    suback_rx: Option<mpsc::Receiver<()>>,
    inbound: Arc<Mutex<Option<Arc<dyn InboundHandler>>>>,
    lost: Arc<Mutex<Option<SignalMailbox>>>,
}

impl MqttBrokerClient {
    fn new(options: MqttOptions) -> Self {
        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAP);
        Self {
            client,
            event_loop: Some(event_loop),
            task: None,
            link_rx: None,
            suback_rx: None,
            inbound: Arc::new(Mutex::new(None)),
            lost: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait until the link leaves `Connecting`, bounded by `limit`.
    async fn await_link_up(
        mut link_rx: watch::Receiver<LinkState>,
        limit: Duration,
    ) -> Result<(), BrokerError> {
        let outcome = tokio::time::timeout(limit, async {
            loop {
                let state = link_rx.borrow().clone();
                match state {
                    LinkState::Connected => return Ok(()),
                    LinkState::Closed(reason) => {
                        return Err(BrokerError::ConnectionFailed(reason.into()));
                    }
                    LinkState::Connecting => {}
                }
                if link_rx.changed().await.is_err() {
                    return Err(BrokerError::ChannelClosed);
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout("connect")),
        }
    }
}

#[async_trait::async_trait]
impl BrokerClient for MqttBrokerClient {
    async fn connect(&mut self, limit: Duration) -> Result<(), BrokerError> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or_else(|| BrokerError::ConnectionFailed("handle already consumed".into()))?;

        let (link_tx, link_rx) = watch::channel(LinkState::Connecting);
        let (suback_tx, suback_rx) = mpsc::channel(4);
        self.link_rx = Some(link_rx.clone());
        self.suback_rx = Some(suback_rx);

        let inbound = Arc::clone(&self.inbound);
        let lost = Arc::clone(&self.lost);
        self.task = Some(tokio::spawn(run_event_loop(
            event_loop, link_tx, suback_tx, inbound, lost,
        )));

        Self::await_link_up(link_rx, limit).await
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
        handler: Arc<dyn InboundHandler>,
        limit: Duration,
    ) -> Result<(), BrokerError> {
        if let Ok(mut slot) = self.inbound.lock() {
            *slot = Some(handler);
        }

        self.client
            .subscribe(topic, qos)
            .await
            .map_err(|e| BrokerError::SubscriptionFailed(Box::new(e)))?;

        let suback_rx = self.suback_rx.as_mut().ok_or(BrokerError::ChannelClosed)?;
        match tokio::time::timeout(limit, suback_rx.recv()).await {
            Ok(Some(())) => Ok(()),
            Ok(None) => Err(BrokerError::ChannelClosed),
            Err(_) => Err(BrokerError::Timeout("subscribe")),
        }
    }

    async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| BrokerError::PublishFailed(Box::new(e)))
    }

    async fn disconnect(&mut self, grace: Duration) {
        // A deliberate teardown must not fire the loss hook.
        if let Ok(mut slot) = self.lost.lock() {
            slot.take();
        }

        let _ = self.client.disconnect().await;

        if let Some(task) = self.task.take() {
            if grace.is_zero() {
                task.abort();
            } else {
                let abort = task.abort_handle();
                if tokio::time::timeout(grace, task).await.is_err() {
                    debug!("event loop did not stop within grace period, aborting");
                    abort.abort();
                }
            }
        }

        // The handle is finished regardless of what the event task last saw.
        self.link_rx = None;
        self.suback_rx = None;
    }

    fn is_connected(&self) -> bool {
        self.link_rx
            .as_ref()
            .map(|rx| matches!(&*rx.borrow(), LinkState::Connected))
            .unwrap_or(false)
    }

    fn on_connection_lost(&mut self, signals: SignalMailbox) {
        if let Ok(mut slot) = self.lost.lock() {
            *slot = Some(signals);
        }
        // The event task closes the link before draining the hook slot, so
        // re-checking after the store guarantees exactly one notification
        // even if the link died during registration.
        let already_closed = self
            .link_rx
            .as_ref()
            .map(|rx| matches!(&*rx.borrow(), LinkState::Closed(_)))
            .unwrap_or(false);
        if already_closed {
            if let Ok(mut slot) = self.lost.lock() {
                if let Some(mailbox) = slot.take() {
                    mailbox.notify_lost();
                }
            }
        }
    }
}

impl Drop for MqttBrokerClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    link_tx: watch::Sender<LinkState>,
    suback_tx: mpsc::Sender<()>,
    inbound: Arc<Mutex<Option<Arc<dyn InboundHandler>>>>,
    lost: Arc<Mutex<Option<SignalMailbox>>>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    debug!("broker acknowledged connection");
                    let _ = link_tx.send(LinkState::Connected);
                } else {
                    close_link(&link_tx, &lost, format!("broker refused connection: {:?}", ack.code));
                    break;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(return_codes = ?ack.return_codes, "subscription acknowledged");
                let _ = suback_tx.try_send(());
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = String::from_utf8_lossy(&publish.topic).to_string();
                let handler = inbound.lock().ok().and_then(|slot| (*slot).clone());
                if let Some(handler) = handler {
                    handler.deliver(topic, publish.payload.clone()).await;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect(_))) => {
                close_link(&link_tx, &lost, "broker disconnected".to_string());
                break;
            }
            Ok(_) => {}
            Err(err) => {
                close_link(&link_tx, &lost, err.to_string());
                break;
            }
        }
    }
}

/// Publish the closed state, then fire the armed loss hook at most once.
fn close_link(
    link_tx: &watch::Sender<LinkState>,
    lost: &Arc<Mutex<Option<SignalMailbox>>>,
    reason: String,
) {
    warn!(reason = %reason, "MQTT link closed");
    let _ = link_tx.send(LinkState::Closed(reason));
    let mailbox = lost.lock().ok().and_then(|mut slot| slot.take());
    if let Some(mailbox) = mailbox {
        mailbox.notify_lost();
    }
}
