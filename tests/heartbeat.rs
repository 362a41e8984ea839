//! Heartbeat publisher tests over the in-memory transport.
//!
//! Loop tests run under a paused clock, so intervals and error backoffs
//! elapse in virtual time.

mod common;

use beacon::heartbeat::HeartbeatPublisher;
use beacon::provisioning::DeviceIdentity;
use beacon::time::SystemClock;
use beacon::transport::Connector;
use common::{MemoryBroker, MemoryConnector, MemorySession, PublishRecord};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const HEARTBEAT_TOPIC: &str = "devices/Onsyte_Dev1/heartbeat";

fn identity() -> DeviceIdentity {
    DeviceIdentity {
        device_id: "Dev1".to_string(),
        thing_name: "Onsyte_Dev1".to_string(),
    }
}

async fn publisher(broker: &MemoryBroker) -> HeartbeatPublisher<MemorySession, SystemClock> {
    let session = MemoryConnector::new(broker, "operational")
        .connect()
        .await
        .unwrap();
    HeartbeatPublisher::new(
        Arc::new(session),
        identity(),
        Duration::from_secs(10),
        SystemClock,
    )
}

async fn wait_for_beats(broker: &MemoryBroker, at_least: usize) -> Vec<PublishRecord> {
    for _ in 0..10_000 {
        let beats = broker.publishes_on(HEARTBEAT_TOPIC);
        if beats.len() >= at_least {
            return beats;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {at_least} heartbeats");
}

fn counts(beats: &[PublishRecord]) -> Vec<i64> {
    beats
        .iter()
        .map(|beat| beat.json()["count"].as_i64().unwrap())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn automatic_beats_count_from_one() {
    let broker = MemoryBroker::new();
    let publisher = publisher(&broker).await;

    publisher.start();
    let beats = wait_for_beats(&broker, 3).await;
    publisher.stop().await;

    assert_eq!(counts(&beats[..3]), vec![1, 2, 3]);
    let first = beats[0].json();
    assert_eq!(first["device_id"], "Dev1");
    assert_eq!(first["status"], "active");
    assert_eq!(first["type"], "automatic");
    assert!(first["timestamp"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn manual_beat_uses_sentinel_count_and_skips_sequence() {
    let broker = MemoryBroker::new();
    let publisher = publisher(&broker).await;

    publisher.publish_now().await.unwrap();

    let beats = broker.publishes_on(HEARTBEAT_TOPIC);
    assert_eq!(beats.len(), 1);
    let beat = beats[0].json();
    assert_eq!(beat["count"], -1);
    assert_eq!(beat["type"], "manual");
    assert_eq!(beat["status"], "active");
    assert_eq!(
        publisher.snapshot().sequence,
        0,
        "manual beats do not consume sequence numbers"
    );
}

#[tokio::test(start_paused = true)]
async fn sequence_survives_stop_and_start() {
    let broker = MemoryBroker::new();
    let publisher = publisher(&broker).await;

    publisher.start();
    wait_for_beats(&broker, 2).await;
    publisher.stop().await;
    let after_stop = broker.publishes_on(HEARTBEAT_TOPIC).len();

    publisher.start();
    let beats = wait_for_beats(&broker, after_stop + 1).await;
    publisher.stop().await;

    let counts = counts(&beats);
    assert_eq!(counts[0], 1);
    for pair in counts.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "no reset across stop/start: {counts:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn stop_halts_publishing() {
    let broker = MemoryBroker::new();
    let publisher = publisher(&broker).await;

    publisher.start();
    assert!(publisher.running());
    wait_for_beats(&broker, 1).await;
    publisher.stop().await;
    assert!(!publisher.running());

    let baseline = broker.publishes_on(HEARTBEAT_TOPIC).len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.publishes_on(HEARTBEAT_TOPIC).len(), baseline);
}

#[tokio::test(start_paused = true)]
async fn failed_publishes_still_consume_sequence_numbers() {
    let broker = MemoryBroker::new();
    broker.fail_next_publishes(2);
    let publisher = publisher(&broker).await;

    publisher.start();
    let beats = wait_for_beats(&broker, 1).await;
    publisher.stop().await;

    assert_eq!(
        beats[0].json()["count"],
        3,
        "counts 1 and 2 were consumed by failed publishes"
    );
    assert!(publisher.snapshot().sequence >= 3);
}

#[tokio::test(start_paused = true)]
async fn start_twice_runs_a_single_loop() {
    let broker = MemoryBroker::new();
    let publisher = publisher(&broker).await;

    publisher.start();
    publisher.start();
    let beats = wait_for_beats(&broker, 3).await;
    publisher.stop().await;

    assert_eq!(counts(&beats[..3]), vec![1, 2, 3]);
}

#[tokio::test]
async fn custom_publish_stamps_missing_timestamp() {
    let broker = MemoryBroker::new();
    let publisher = publisher(&broker).await;

    let sent = publisher
        .publish_custom("status", json!({ "battery": 97 }))
        .await
        .unwrap();

    assert_eq!(sent["battery"], 97);
    assert!(sent["timestamp"].as_u64().unwrap() > 0);
    let records = broker.publishes_on("devices/Onsyte_Dev1/status");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].json(), sent);
}

#[tokio::test]
async fn custom_publish_preserves_existing_timestamp() {
    let broker = MemoryBroker::new();
    let publisher = publisher(&broker).await;

    let sent = publisher
        .publish_custom("status", json!({ "timestamp": 12345, "battery": 97 }))
        .await
        .unwrap();

    assert_eq!(sent["timestamp"], 12345);
    assert_eq!(sent["battery"], 97);
}
