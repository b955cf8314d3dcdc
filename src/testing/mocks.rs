//! Mock broker implementations for testing
//!
//! [`MockConnector`] hands out [`MockBroker`] handles whose connect,
//! subscribe, and publish outcomes follow a script, one [`HandleScript`] per
//! handle in creation order. A [`ConnectorProbe`] observes everything the
//! bridge did to each handle and can inject connection losses and inbound
//! messages.

use crate::record::InboundRecord;
use crate::signal::SignalMailbox;
use crate::source::RecordWriter;
use crate::transport::{BrokerClient, BrokerConnector, BrokerError, InboundHandler, QoS};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// One recorded publish: topic, qos, retain, payload
pub type PublishedMessage = (String, QoS, bool, Vec<u8>);

/// Scripted outcomes for one mock handle
#[derive(Debug, Clone)]
pub struct HandleScript {
    pub connect_ok: bool,
    pub subscribe_ok: bool,
    pub publish_ok: bool,
}

impl HandleScript {
    pub fn healthy() -> Self {
        Self {
            connect_ok: true,
            subscribe_ok: true,
            publish_ok: true,
        }
    }

    pub fn connect_fails() -> Self {
        Self {
            connect_ok: false,
            ..Self::healthy()
        }
    }

    pub fn subscribe_fails() -> Self {
        Self {
            subscribe_ok: false,
            ..Self::healthy()
        }
    }

    pub fn publish_fails() -> Self {
        Self {
            publish_ok: false,
            ..Self::healthy()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
struct HandleState {
    connected: AtomicBool,
    subscribed: AtomicBool,
    handler: Mutex<Option<Arc<dyn InboundHandler>>>,
    lost_hook: Mutex<Option<SignalMailbox>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    published: Mutex<Vec<PublishedMessage>>,
    disconnect_graces: Mutex<Vec<Duration>>,
}

struct ConnectorState {
    scripts: Mutex<VecDeque<HandleScript>>,
    handles: Mutex<Vec<Arc<HandleState>>>,
    connect_attempts: AtomicUsize,
}

/// Builds scripted [`MockBroker`] handles
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl MockConnector {
    /// Handles are scripted in creation order; once the scripts run out,
    /// further handles behave healthily.
    pub fn new(scripts: Vec<HandleScript>) -> Self {
        Self {
            state: Arc::new(ConnectorState {
                scripts: Mutex::new(scripts.into()),
                handles: Mutex::new(Vec::new()),
                connect_attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Observation side of this connector, usable after the connector has
    /// been moved into a source.
    pub fn probe(&self) -> ConnectorProbe {
        ConnectorProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl BrokerConnector for MockConnector {
    type Handle = MockBroker;

    fn fresh_handle(&self) -> MockBroker {
        let script = lock(&self.state.scripts)
            .pop_front()
            .unwrap_or_else(HandleScript::healthy);
        let handle_state = Arc::new(HandleState::default());
        lock(&self.state.handles).push(Arc::clone(&handle_state));
        MockBroker {
            script,
            state: handle_state,
            connector: Arc::clone(&self.state),
        }
    }
}

/// Observes and manipulates the handles a [`MockConnector`] created
#[derive(Clone)]
pub struct ConnectorProbe {
    state: Arc<ConnectorState>,
}

impl ConnectorProbe {
    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn handles_created(&self) -> usize {
        lock(&self.state.handles).len()
    }

    /// Probe for the `index`-th handle in creation order.
    pub fn handle(&self, index: usize) -> Option<HandleProbe> {
        lock(&self.state.handles)
            .get(index)
            .map(|state| HandleProbe {
                state: Arc::clone(state),
            })
    }

    /// Wait until the `index`-th handle exists and has an acknowledged
    /// subscription.
    pub async fn wait_until_subscribed(&self, index: usize) -> HandleProbe {
        loop {
            if let Some(handle) = self.handle(index) {
                if handle.is_subscribed() {
                    return handle;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Wait until `count` connect attempts have been made across all handles.
    pub async fn wait_for_connect_attempts(&self, count: usize) {
        while self.connect_attempts() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

/// Observation/injection side of one mock handle
#[derive(Clone)]
pub struct HandleProbe {
    state: Arc<HandleState>,
}

impl HandleProbe {
    pub fn is_subscribed(&self) -> bool {
        self.state.subscribed.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.state.subscriptions).clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state.published).clone()
    }

    pub fn disconnect_graces(&self) -> Vec<Duration> {
        lock(&self.state.disconnect_graces).clone()
    }

    /// Simulate the network layer tearing the connection down.
    pub fn lose_connection(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        if let Some(mailbox) = lock(&self.state.lost_hook).take() {
            mailbox.notify_lost();
        }
    }

    /// Deliver a broker message to the registered subscription handler.
    pub async fn deliver(&self, topic: &str, payload: &[u8]) {
        let handler = lock(&self.state.handler).clone();
        if let Some(handler) = handler {
            handler
                .deliver(topic.to_string(), Bytes::copy_from_slice(payload))
                .await;
        }
    }
}

/// Scripted broker handle
pub struct MockBroker {
    script: HandleScript,
    state: Arc<HandleState>,
    connector: Arc<ConnectorState>,
}

#[async_trait::async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&mut self, _limit: Duration) -> Result<(), BrokerError> {
        self.connector.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.script.connect_ok {
            self.state.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(BrokerError::ConnectionFailed(
                "scripted connect failure".to_string().into(),
            ))
        }
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
        handler: Arc<dyn InboundHandler>,
        _limit: Duration,
    ) -> Result<(), BrokerError> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::SubscriptionFailed(
                "not connected".to_string().into(),
            ));
        }
        if !self.script.subscribe_ok {
            return Err(BrokerError::SubscriptionFailed(
                "scripted subscribe failure".to_string().into(),
            ));
        }
        *lock(&self.state.handler) = Some(handler);
        lock(&self.state.subscriptions).push((topic.to_string(), qos));
        self.state.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        if !self.script.publish_ok {
            return Err(BrokerError::PublishFailed(
                "scripted publish failure".to_string().into(),
            ));
        }
        lock(&self.state.published).push((topic.to_string(), qos, retain, payload));
        Ok(())
    }

    async fn disconnect(&mut self, grace: Duration) {
        lock(&self.state.disconnect_graces).push(grace);
        self.state.connected.store(false, Ordering::SeqCst);
        lock(&self.state.lost_hook).take();
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn on_connection_lost(&mut self, signals: SignalMailbox) {
        if self.state.connected.load(Ordering::SeqCst) {
            *lock(&self.state.lost_hook) = Some(signals);
        } else {
            // Registration on an already-dead link fires immediately, like
            // the real transport.
            signals.notify_lost();
        }
    }
}

/// Record writer that appends every record to a shared vector
#[derive(Clone, Default)]
pub struct CollectingWriter {
    records: Arc<AsyncMutex<Vec<InboundRecord>>>,
}

impl CollectingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<InboundRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl RecordWriter for CollectingWriter {
    async fn write(
        &self,
        record: InboundRecord,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Record writer that rejects everything
#[derive(Clone, Copy, Default)]
pub struct RejectingWriter;

#[async_trait::async_trait]
impl RecordWriter for RejectingWriter {
    async fn write(
        &self,
        _record: InboundRecord,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("writer rejects all records".into())
    }
}
