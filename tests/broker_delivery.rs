use std::sync::Arc;
use std::time::Duration;

use gpu_telemetry::broker::{Broker, BrokerConfig, Headers, Mode, Received};

fn broker(ack_timeout: Duration, max_retries: u32) -> Arc<Broker> {
    Arc::new(Broker::new(BrokerConfig {
        ack_timeout,
        max_retries,
        redelivery_tick: Duration::from_millis(20),
        ..Default::default()
    }))
}

#[tokio::test]
async fn unacked_envelope_is_redelivered_until_acked() {
    let broker = broker(Duration::from_millis(50), 3);
    let subscriber = broker.subscribe("telemetry", Mode::Acknowledged);

    broker
        .publish("telemetry", b"payload-1".to_vec(), Headers::new())
        .await
        .expect("publish");

    let first = subscriber.recv().await.expect("first delivery");
    let Received::Ack(delivery) = first else {
        panic!("expected acknowledged delivery");
    };
    assert_eq!(delivery.retry_count(), 0);
    // Deliberately not acked: the redelivery tick should resend it.

    let second = subscriber.recv().await.expect("redelivered");
    let Received::Ack(redelivered) = second else {
        panic!("expected acknowledged delivery");
    };
    assert_eq!(redelivered.envelope.id, delivery.envelope.id);
    assert_eq!(redelivered.retry_count(), 1);
    redelivered.ack();

    let stats = broker.topic_stats("telemetry").expect("topic exists");
    assert_eq!(stats.consumed, 1);
    broker.shutdown().await;
}

#[tokio::test]
async fn exhausted_retry_budget_dead_letters_and_stops_redelivery() {
    let broker = broker(Duration::from_millis(30), 1);
    let subscriber = broker.subscribe("telemetry", Mode::Acknowledged);

    broker
        .publish("telemetry", b"poison".to_vec(), Headers::new())
        .await
        .expect("publish");

    // Original delivery + one redelivery (retry_count 1) = max_retries budget of 1.
    for _ in 0..2 {
        let received = subscriber.recv().await.expect("delivery");
        assert!(matches!(received, Received::Ack(_)));
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = broker.topic_stats("telemetry").expect("topic exists");
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.pending, 0);
    broker.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_stops_future_delivery() {
    let broker = broker(Duration::from_secs(30), 3);
    let subscriber = broker.subscribe("telemetry", Mode::Acknowledged);
    broker.unsubscribe(&subscriber);

    broker
        .publish("telemetry", b"after-unsubscribe".to_vec(), Headers::new())
        .await
        .expect("publish");

    assert!(subscriber.recv().await.is_none());
    broker.shutdown().await;
}

#[tokio::test]
async fn double_ack_is_idempotent() {
    let broker = broker(Duration::from_secs(30), 3);
    let subscriber = broker.subscribe("telemetry", Mode::Acknowledged);
    broker
        .publish("telemetry", b"payload".to_vec(), Headers::new())
        .await
        .expect("publish");

    let Received::Ack(delivery) = subscriber.recv().await.expect("delivery") else {
        panic!("expected acknowledged delivery");
    };
    delivery.ack();
    delivery.ack(); // second call is a no-op, not a panic or double-count

    let stats = broker.topic_stats("telemetry").expect("topic exists");
    assert_eq!(stats.consumed, 1);
    broker.shutdown().await;
}

#[tokio::test]
async fn fire_and_forget_subscriber_receives_raw_payload_without_acking() {
    let broker = broker(Duration::from_secs(30), 3);
    let subscriber = broker.subscribe("telemetry", Mode::FireAndForget);
    broker
        .publish("telemetry", b"raw".to_vec(), Headers::new())
        .await
        .expect("publish");

    match subscriber.recv().await.expect("delivery") {
        Received::Payload(bytes) => assert_eq!(bytes, b"raw"),
        Received::Ack(_) => panic!("fire-and-forget should not require acking"),
    }
    broker.shutdown().await;
}

#[tokio::test]
async fn publish_to_new_topic_never_fails() {
    let broker = broker(Duration::from_secs(30), 3);
    let id = broker
        .publish("a-brand-new-topic", b"x".to_vec(), Headers::new())
        .await
        .expect("publish to unseen topic succeeds");
    assert!(id > 0);
    broker.shutdown().await;
}

#[tokio::test]
async fn empty_topic_name_is_rejected() {
    let broker = broker(Duration::from_secs(30), 3);
    let err = broker
        .publish("", b"x".to_vec(), Headers::new())
        .await
        .expect_err("empty topic must be rejected");
    assert_eq!(err.kind(), gpu_telemetry::ErrorKind::Validation);
    broker.shutdown().await;
}
