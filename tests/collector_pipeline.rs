use std::sync::Arc;
use std::time::Duration;

use gpu_telemetry::broker::{Broker, BrokerConfig, Headers};
use gpu_telemetry::collector::{Collector, CollectorConfig};
use tempfile::tempdir;

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition did not become true in time");
}

#[tokio::test]
async fn collector_dual_writes_well_formed_envelopes() {
    let data_dir = tempdir().expect("data dir");
    let checkpoint_dir = tempdir().expect("checkpoint dir");
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let collector = Collector::new(
        CollectorConfig {
            workers: 2,
            topic: "telemetry".to_string(),
            data_dir: data_dir.path().to_path_buf(),
            checkpoint_dir: checkpoint_dir.path().to_path_buf(),
            max_entries_per_gpu: 10,
            ..Default::default()
        }
        .fast_checkpoint(),
        broker.clone(),
    )
    .expect("collector init");
    collector.start().await;

    let payload = br#"{"fields":{"gpu_id":"gpu_0","hostname":"node-a","temperature":"72.5"}}"#.to_vec();
    broker
        .publish("telemetry", payload, Headers::new())
        .await
        .expect("publish");

    wait_until(|| !collector.memory_store().get("gpu_0", 10).is_empty()).await;

    let records = collector.memory_store().get("gpu_0", 10);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hostname.as_deref(), Some("node-a"));
    assert!((records[0].metrics["temperature"] - 72.5).abs() < 1e-9);

    let file_store = collector.file_store();
    let on_disk = file_store.read("gpu_0", 10, false).expect("read file store");
    assert_eq!(on_disk.len(), 1);

    collector.stop().await;
    broker.shutdown().await;
}

#[tokio::test]
async fn malformed_payload_is_acked_and_counted_not_stored() {
    let data_dir = tempdir().expect("data dir");
    let checkpoint_dir = tempdir().expect("checkpoint dir");
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let collector = Collector::new(
        CollectorConfig {
            workers: 1,
            topic: "telemetry".to_string(),
            data_dir: data_dir.path().to_path_buf(),
            checkpoint_dir: checkpoint_dir.path().to_path_buf(),
            ..Default::default()
        }
        .fast_checkpoint(),
        broker.clone(),
    )
    .expect("collector init");
    collector.start().await;

    broker
        .publish("telemetry", b"not json at all".to_vec(), Headers::new())
        .await
        .expect("publish");

    wait_until(|| collector.stats().malformed_count == 1).await;

    assert!(collector.memory_store().list_gpus().is_empty());

    collector.stop().await;
    broker.shutdown().await;
}

#[tokio::test]
async fn checkpoint_advances_as_messages_are_processed() {
    let data_dir = tempdir().expect("data dir");
    let checkpoint_dir = tempdir().expect("checkpoint dir");
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let collector = Collector::new(
        CollectorConfig {
            workers: 1,
            topic: "telemetry".to_string(),
            data_dir: data_dir.path().to_path_buf(),
            checkpoint_dir: checkpoint_dir.path().to_path_buf(),
            ..Default::default()
        }
        .fast_checkpoint(),
        broker.clone(),
    )
    .expect("collector init");
    collector.start().await;

    for i in 0..3 {
        let payload = format!(r#"{{"fields":{{"gpu_id":"gpu_{i}","util":"1.0"}}}}"#).into_bytes();
        broker.publish("telemetry", payload, Headers::new()).await.expect("publish");
    }

    wait_until(|| collector.memory_store().list_gpus().len() == 3).await;
    collector.stop().await;

    let checkpoint_store = gpu_telemetry::collector::CheckpointStore::new(checkpoint_dir.path()).expect("open checkpoint store");
    let key = gpu_telemetry::collector::worker_key(0);
    assert_eq!(checkpoint_store.load(&key), 3);

    broker.shutdown().await;
}
