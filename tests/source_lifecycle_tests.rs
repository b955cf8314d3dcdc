//! Integration tests for the inbound bridge lifecycle
//!
//! Drives `MqttSource` against scripted mock brokers, covering:
//! - stop requests racing connects, backoff waits, and connection loss
//! - retry ceiling semantics and backoff reset on success
//! - handle replacement and disconnect invariants
//! - record emission ordering

use mqtt_bridge::config::SourceConfig;
use mqtt_bridge::error::{BridgeError, BridgeResult};
use mqtt_bridge::source::{MqttSource, StopHandle};
use mqtt_bridge::testing::mocks::{
    CollectingWriter, ConnectorProbe, HandleScript, MockConnector, RejectingWriter,
};
use mqtt_bridge::transport::QoS;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

fn fast_config(retries: i64) -> SourceConfig {
    let mut config = SourceConfig::new("bridge/#");
    config.reconnect_min_time = Duration::from_millis(1);
    config.reconnect_max_time = Duration::from_millis(5);
    config.reconnect_retries = retries;
    config
}

struct RunningSource {
    run: JoinHandle<BridgeResult<()>>,
    probe: ConnectorProbe,
    stop: StopHandle,
    writer: CollectingWriter,
}

fn spawn_source(config: SourceConfig, scripts: Vec<HandleScript>) -> RunningSource {
    let connector = MockConnector::new(scripts);
    let probe = connector.probe();
    let mut source = MqttSource::with_connector(config, connector).expect("valid config");
    let stop = source.stop_handle();
    let writer = CollectingWriter::new();
    let run_writer = writer.clone();
    let run = tokio::spawn(async move { source.run(run_writer).await });
    RunningSource {
        run,
        probe,
        stop,
        writer,
    }
}

async fn join(run: JoinHandle<BridgeResult<()>>) -> BridgeResult<()> {
    timeout(Duration::from_secs(5), run)
        .await
        .expect("run should terminate")
        .expect("run task should not panic")
}

#[tokio::test]
async fn stop_before_first_connect_terminates_without_connecting() {
    let bridge = spawn_source(fast_config(10), vec![HandleScript::healthy()]);
    bridge.stop.request_stop();

    assert!(join(bridge.run).await.is_ok());
    assert_eq!(bridge.probe.connect_attempts(), 0);
}

#[tokio::test]
async fn graceful_stop_from_active_disconnects_with_grace() {
    let bridge = spawn_source(fast_config(10), vec![HandleScript::healthy()]);
    let handle = bridge.probe.wait_until_subscribed(0).await;

    bridge.stop.request_stop();
    assert!(join(bridge.run).await.is_ok());

    assert_eq!(bridge.probe.handles_created(), 1);
    assert_eq!(handle.disconnect_graces(), vec![Duration::from_millis(250)]);
}

#[tokio::test]
async fn repeated_stop_requests_have_the_same_outcome() {
    let bridge = spawn_source(fast_config(10), vec![HandleScript::healthy()]);
    bridge.probe.wait_until_subscribed(0).await;

    bridge.stop.request_stop();
    bridge.stop.request_stop();
    assert!(join(bridge.run).await.is_ok());
    // Stopping an already-terminated source must not panic either.
    bridge.stop.request_stop();
}

#[tokio::test]
async fn zero_retries_makes_the_first_failure_terminal() {
    let bridge = spawn_source(fast_config(0), vec![HandleScript::connect_fails()]);

    let result = join(bridge.run).await;
    assert!(matches!(
        result,
        Err(BridgeError::RetriesExhausted { .. })
    ));
    assert_eq!(bridge.probe.connect_attempts(), 1);
    assert_eq!(bridge.probe.handles_created(), 1);
}

#[tokio::test]
async fn finite_ceiling_is_exceeded_by_consecutive_failures() {
    let scripts = vec![
        HandleScript::connect_fails(),
        HandleScript::connect_fails(),
        HandleScript::connect_fails(),
    ];
    let bridge = spawn_source(fast_config(2), scripts);

    let result = join(bridge.run).await;
    assert!(matches!(
        result,
        Err(BridgeError::RetriesExhausted { attempts: 3 })
    ));
    assert_eq!(bridge.probe.connect_attempts(), 3);
}

#[tokio::test]
async fn unlimited_retries_survive_mixed_failures() {
    let scripts = vec![
        HandleScript::connect_fails(),
        HandleScript::connect_fails(),
        HandleScript::subscribe_fails(),
        HandleScript::healthy(),
    ];
    let bridge = spawn_source(fast_config(-1), scripts);

    bridge.probe.wait_until_subscribed(3).await;
    assert_eq!(bridge.probe.handles_created(), 4);

    bridge.stop.request_stop();
    assert!(join(bridge.run).await.is_ok());
}

#[tokio::test]
async fn subscribe_failure_discards_the_handle_before_replacing_it() {
    let scripts = vec![HandleScript::subscribe_fails(), HandleScript::healthy()];
    let bridge = spawn_source(fast_config(10), scripts);

    bridge.probe.wait_until_subscribed(1).await;

    let first = bridge.probe.handle(0).expect("first handle exists");
    assert!(first.subscriptions().is_empty());
    assert_eq!(first.disconnect_graces(), vec![Duration::ZERO]);

    bridge.stop.request_stop();
    assert!(join(bridge.run).await.is_ok());
}

#[tokio::test]
async fn lost_connection_reconnects_on_a_fresh_handle() {
    let bridge = spawn_source(
        fast_config(10),
        vec![HandleScript::healthy(), HandleScript::healthy()],
    );
    let first = bridge.probe.wait_until_subscribed(0).await;

    first.lose_connection();
    let second = bridge.probe.wait_until_subscribed(1).await;

    assert_eq!(
        second.subscriptions(),
        vec![("bridge/#".to_string(), QoS::AtMostOnce)]
    );
    // The network layer already tore the lost handle down; the controller
    // must not disconnect it again.
    assert!(first.disconnect_graces().is_empty());

    bridge.stop.request_stop();
    assert!(join(bridge.run).await.is_ok());
    assert_eq!(second.disconnect_graces(), vec![Duration::from_millis(250)]);
}

#[tokio::test]
async fn successful_subscribe_resets_the_retry_budget() {
    // Two failures fit under a ceiling of 2 only if the intermediate
    // success resets the counter.
    let scripts = vec![
        HandleScript::connect_fails(),
        HandleScript::connect_fails(),
        HandleScript::healthy(),
        HandleScript::connect_fails(),
        HandleScript::connect_fails(),
        HandleScript::healthy(),
    ];
    let bridge = spawn_source(fast_config(2), scripts);

    let first_active = bridge.probe.wait_until_subscribed(2).await;
    first_active.lose_connection();
    bridge.probe.wait_until_subscribed(5).await;

    bridge.stop.request_stop();
    assert!(join(bridge.run).await.is_ok());
}

#[tokio::test]
async fn stop_wins_over_a_simultaneous_connection_loss() {
    let bridge = spawn_source(fast_config(10), vec![HandleScript::healthy()]);
    let handle = bridge.probe.wait_until_subscribed(0).await;

    bridge.stop.request_stop();
    handle.lose_connection();

    assert!(join(bridge.run).await.is_ok());
    assert_eq!(bridge.probe.handles_created(), 1);
}

#[tokio::test]
async fn stop_during_backoff_wait_terminates_promptly() {
    let mut config = fast_config(-1);
    config.reconnect_min_time = Duration::from_secs(30);
    config.reconnect_max_time = Duration::from_secs(60);
    let bridge = spawn_source(config, vec![HandleScript::connect_fails()]);

    bridge.probe.wait_for_connect_attempts(1).await;
    bridge.stop.request_stop();

    let result = timeout(Duration::from_secs(1), bridge.run)
        .await
        .expect("stop must preempt the backoff wait")
        .expect("run task should not panic");
    assert!(result.is_ok());
}

#[tokio::test]
async fn records_reach_the_writer_in_delivery_order() {
    let bridge = spawn_source(fast_config(10), vec![HandleScript::healthy()]);
    let handle = bridge.probe.wait_until_subscribed(0).await;

    handle.deliver("bridge/a", b"one").await;
    handle.deliver("bridge/b", b"two").await;
    handle.deliver("bridge/a", b"three").await;

    let records = bridge.writer.records().await;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].topic, "bridge/a");
    assert_eq!(records[0].payload.as_ref(), b"one");
    assert_eq!(records[1].topic, "bridge/b");
    assert_eq!(records[2].payload.as_ref(), b"three");

    bridge.stop.request_stop();
    assert!(join(bridge.run).await.is_ok());
}

#[tokio::test]
async fn writer_errors_do_not_disturb_the_subscription() {
    let connector = MockConnector::new(vec![HandleScript::healthy()]);
    let probe = connector.probe();
    let mut source = MqttSource::with_connector(fast_config(10), connector).expect("valid config");
    let stop = source.stop_handle();
    let run = tokio::spawn(async move { source.run(RejectingWriter).await });

    let handle = probe.wait_until_subscribed(0).await;
    handle.deliver("bridge/a", b"rejected").await;
    handle.deliver("bridge/a", b"also rejected").await;

    assert!(handle.is_subscribed());
    stop.request_stop();
    assert!(join(run).await.is_ok());
}
