//! Integration tests for the outbound bridge
//!
//! Exercises field mapping, the disconnected-write gate, and close semantics
//! through the public sink API against a scripted mock broker.

use mqtt_bridge::config::SinkConfig;
use mqtt_bridge::error::BridgeError;
use mqtt_bridge::record::Value;
use mqtt_bridge::sink::{MqttSink, RecordError};
use mqtt_bridge::testing::mocks::{HandleProbe, HandleScript, MockConnector};
use mqtt_bridge::transport::{BrokerClient, BrokerConnector, QoS};
use serde_json::json;
use std::time::Duration;

async fn connected_sink(
    script: HandleScript,
    config: SinkConfig,
) -> (MqttSink<mqtt_bridge::testing::mocks::MockBroker>, HandleProbe) {
    let connector = MockConnector::new(vec![script]);
    let probe = connector.probe();
    let mut handle = connector.fresh_handle();
    handle
        .connect(Duration::from_secs(1))
        .await
        .expect("scripted connect");
    let sink = MqttSink::with_handle(handle, &config).expect("valid config");
    (sink, probe.handle(0).expect("handle exists"))
}

fn record(json: serde_json::Value) -> Value {
    Value::from(json)
}

#[tokio::test]
async fn write_publishes_the_mapped_record() {
    let (mut sink, probe) = connected_sink(HandleScript::healthy(), SinkConfig::default()).await;

    sink.write(&record(json!({"topic": "a/b", "payload": "hello"})))
        .await
        .expect("write should succeed");

    let published = probe.published();
    assert_eq!(published.len(), 1);
    let (topic, qos, retain, payload) = &published[0];
    assert_eq!(topic, "a/b");
    assert_eq!(*qos, QoS::AtMostOnce);
    assert!(!*retain);
    assert_eq!(payload, b"hello");
}

#[tokio::test]
async fn structured_payload_uses_the_default_topic() {
    let config = SinkConfig {
        default_topic: Some("fallback".to_string()),
        ..SinkConfig::default()
    };
    let (mut sink, probe) = connected_sink(HandleScript::healthy(), config).await;

    sink.write(&record(json!({"payload": {"x": 1}})))
        .await
        .expect("write should succeed");

    let published = probe.published();
    assert_eq!(published[0].0, "fallback");
    assert_eq!(published[0].3, br#"{"x":1}"#);
}

#[tokio::test]
async fn qos_field_selects_the_delivery_level() {
    let (mut sink, probe) = connected_sink(HandleScript::healthy(), SinkConfig::default()).await;

    sink.write(&record(json!({"topic": "t", "payload": "x", "qos": 1})))
        .await
        .expect("write should succeed");

    assert_eq!(probe.published()[0].1, QoS::AtLeastOnce);
}

#[tokio::test]
async fn out_of_range_qos_is_a_record_error() {
    let (mut sink, probe) = connected_sink(HandleScript::healthy(), SinkConfig::default()).await;

    let result = sink
        .write(&record(json!({"topic": "t", "payload": "x", "qos": 5})))
        .await;

    assert!(matches!(
        result,
        Err(BridgeError::Record(RecordError::InvalidQos { value: 5 }))
    ));
    assert!(probe.published().is_empty());
}

#[tokio::test]
async fn missing_topic_without_default_is_a_record_error() {
    let (mut sink, probe) = connected_sink(HandleScript::healthy(), SinkConfig::default()).await;

    let result = sink.write(&record(json!({"payload": "x"}))).await;

    assert!(matches!(
        result,
        Err(BridgeError::Record(RecordError::TopicFieldMissing { .. }))
    ));
    assert!(probe.published().is_empty());
}

#[tokio::test]
async fn record_errors_do_not_poison_later_writes() {
    let (mut sink, probe) = connected_sink(HandleScript::healthy(), SinkConfig::default()).await;

    let bad = sink.write(&record(json!({"payload": 7, "topic": "t"}))).await;
    assert!(matches!(bad, Err(BridgeError::Record(_))));

    sink.write(&record(json!({"topic": "t", "payload": "good"})))
        .await
        .expect("later write should succeed");
    assert_eq!(probe.published().len(), 1);
}

#[tokio::test]
async fn disconnected_sink_drops_records_silently() {
    let connector = MockConnector::new(vec![HandleScript::healthy()]);
    let probe = connector.probe();
    // Never connected.
    let handle = connector.fresh_handle();
    let mut sink = MqttSink::with_handle(handle, &SinkConfig::default()).expect("valid config");

    sink.write(&record(json!({"topic": "t", "payload": "x"})))
        .await
        .expect("disconnected write must be a silent no-op");

    assert!(probe.handle(0).expect("handle exists").published().is_empty());
}

#[tokio::test]
async fn retained_flag_is_applied_to_every_publish() {
    let config = SinkConfig {
        retained: true,
        ..SinkConfig::default()
    };
    let (mut sink, probe) = connected_sink(HandleScript::healthy(), config).await;

    sink.write(&record(json!({"topic": "t", "payload": "x"})))
        .await
        .expect("write should succeed");

    assert!(probe.published()[0].2);
}

#[tokio::test]
async fn broker_publish_failure_is_surfaced() {
    let (mut sink, _probe) = connected_sink(HandleScript::publish_fails(), SinkConfig::default()).await;

    let result = sink.write(&record(json!({"topic": "t", "payload": "x"}))).await;
    assert!(matches!(result, Err(BridgeError::Broker(_))));
}

#[tokio::test]
async fn close_disconnects_with_grace_and_silences_later_writes() {
    let (mut sink, probe) = connected_sink(HandleScript::healthy(), SinkConfig::default()).await;

    sink.close().await;
    assert_eq!(probe.disconnect_graces(), vec![Duration::from_millis(250)]);

    sink.write(&record(json!({"topic": "t", "payload": "x"})))
        .await
        .expect("write after close must be a silent no-op");
    assert!(probe.published().is_empty());
}

#[tokio::test]
async fn invalid_sink_config_is_rejected_before_connecting() {
    let config = SinkConfig {
        default_qos: 9,
        ..SinkConfig::default()
    };
    let connector = MockConnector::new(vec![HandleScript::healthy()]);
    let handle = connector.fresh_handle();
    assert!(matches!(
        MqttSink::with_handle(handle, &config),
        Err(BridgeError::Config(_))
    ));
}
