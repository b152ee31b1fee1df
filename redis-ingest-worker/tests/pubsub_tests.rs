/// End-to-end tests for channel and pattern channel modes
///
/// These run against the in-memory broker; no Redis server is needed.

mod common;

use common::{numbered, numbers, TestContext};
use redis_ingest_shared::config::{DataType, InputConfig};
use redis_ingest_worker::supervisor::StopReason;
use std::time::Duration;

#[tokio::test]
async fn test_channel_receives_only_its_topic_in_order() {
    let mut ctx = TestContext::start(InputConfig::new("alerts", DataType::Channel));
    ctx.broker.wait_for_subscribers(1).await;

    for payload in numbered(0..5) {
        assert_eq!(ctx.broker.publish("alerts", payload), 1);
    }
    assert_eq!(ctx.broker.publish("alerts.east", r#"{"n":99}"#), 0);
    assert_eq!(ctx.broker.publish("other", r#"{"n":98}"#), 0);

    let events = ctx.recv(5).await;
    assert_eq!(numbers(&events), vec![0, 1, 2, 3, 4]);
    for event in &events {
        let origin = event.origin.as_ref().unwrap();
        assert_eq!(origin.channel.as_deref(), Some("alerts"));
        assert_eq!(origin.data_type, DataType::Channel);
    }

    ctx.assert_quiet().await;
    assert_eq!(ctx.stop().await, vec![StopReason::Shutdown]);
}

#[tokio::test]
async fn test_pattern_stamps_matching_channel() {
    let mut ctx = TestContext::start(InputConfig::new("alerts.*", DataType::PatternChannel));
    ctx.broker.wait_for_subscribers(1).await;

    assert_eq!(ctx.broker.publish("alerts.east", r#"{"n":1}"#), 1);
    assert_eq!(ctx.broker.publish("other.topic", r#"{"n":2}"#), 0);
    assert_eq!(ctx.broker.publish("alerts.west", r#"{"n":3}"#), 1);

    let events = ctx.recv(2).await;
    assert_eq!(numbers(&events), vec![1, 3]);

    let channels: Vec<_> = events
        .iter()
        .map(|e| e.to_json()["@metadata"]["redis_channel"].clone())
        .collect();
    assert_eq!(channels, vec!["alerts.east", "alerts.west"]);
    assert_eq!(
        events[0].to_json()["@metadata"]["redis_pattern"],
        "alerts.*"
    );

    ctx.assert_quiet().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_shutdown_unsubscribes_and_closes() {
    let ctx = TestContext::start(InputConfig::new("alerts", DataType::Channel));
    ctx.broker.wait_for_subscribers(1).await;
    let broker = ctx.broker.clone();

    assert_eq!(ctx.stop().await, vec![StopReason::Shutdown]);
    assert_eq!(broker.subscriber_count(), 0);
    assert_eq!(broker.publish("alerts", r#"{"n":1}"#), 0);
}

#[tokio::test]
async fn test_resubscribes_after_connection_loss() {
    let mut ctx = TestContext::start(InputConfig::new("alerts", DataType::Channel));
    ctx.broker.wait_for_subscribers(1).await;
    ctx.broker.publish("alerts", r#"{"n":1}"#);
    ctx.recv(1).await;

    ctx.broker.drop_connections();
    assert_eq!(ctx.broker.subscriber_count(), 0);

    tokio::time::timeout(Duration::from_secs(5), ctx.broker.wait_for_subscribers(1))
        .await
        .expect("listener did not resubscribe");
    assert_eq!(ctx.broker.connects(), 2);

    ctx.broker.publish("alerts", r#"{"n":2}"#);
    assert_eq!(numbers(&ctx.recv(1).await), vec![2]);

    ctx.stop().await;
}

#[tokio::test]
async fn test_plain_codec_on_channel() {
    let mut config = InputConfig::new("logs", DataType::Channel);
    config.codec = redis_ingest_shared::config::CodecKind::Plain;

    let mut ctx = TestContext::start(config);
    ctx.broker.wait_for_subscribers(1).await;
    ctx.broker.publish("logs", "GET /index.html 200");

    let event = ctx.recv(1).await.remove(0);
    assert_eq!(event.to_json()["message"], "GET /index.html 200");

    ctx.stop().await;
}
