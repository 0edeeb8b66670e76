use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use gpu_telemetry::broker::{Broker, BrokerConfig, Mode, Received};
use gpu_telemetry::streamer::{Streamer, StreamerConfig};
use tempfile::tempdir;

fn write_csv(dir: &std::path::Path, rows: &[&str]) -> std::path::PathBuf {
    let path = dir.join("gpus.csv");
    let mut file = std::fs::File::create(&path).expect("create csv");
    writeln!(file, "gpu_id,hostname,utilization,throttled").expect("write header");
    for row in rows {
        writeln!(file, "{row}").expect("write row");
    }
    path
}

#[tokio::test]
async fn replayer_converts_rows_and_coerces_fields() {
    let dir = tempdir().expect("tempdir");
    let csv_path = write_csv(&dir.path(), &["gpu_0,node-a,85.5,true"]);

    let broker = Arc::new(Broker::new(BrokerConfig::default()));
    let subscriber = broker.subscribe("telemetry", Mode::Acknowledged);

    let streamer = Streamer::new(
        broker.clone(),
        StreamerConfig {
            csv_path,
            workers: 1,
            rate_per_worker: 50.0,
            topic: "telemetry".to_string(),
            host_filter: None,
        },
    );
    streamer.start().await.expect("start");

    let Received::Ack(delivery) = subscriber.recv().await.expect("delivery") else {
        panic!("expected acknowledged delivery");
    };
    let value: serde_json::Value = serde_json::from_slice(&delivery.envelope.payload).expect("json");
    assert_eq!(value["fields"]["gpu_id"], "gpu_0");
    assert_eq!(value["fields"]["utilization"], 85.5);
    assert_eq!(value["fields"]["throttled"], true);
    delivery.ack();

    streamer.stop().await;
    broker.shutdown().await;
}

#[tokio::test]
async fn replayer_restarts_at_eof_for_infinite_replay() {
    let dir = tempdir().expect("tempdir");
    let csv_path = write_csv(&dir.path(), &["gpu_0,node-a,1.0,false"]);

    let broker = Arc::new(Broker::new(BrokerConfig::default()));
    let subscriber = broker.subscribe("telemetry", Mode::FireAndForget);

    let streamer = Streamer::new(
        broker.clone(),
        StreamerConfig {
            csv_path,
            workers: 1,
            rate_per_worker: 200.0,
            topic: "telemetry".to_string(),
            host_filter: None,
        },
    );
    streamer.start().await.expect("start");

    // A single-row file replayed at a high rate for a little while must
    // produce more deliveries than rows in the file: the worker restarted.
    let mut seen = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    while tokio::time::Instant::now() < deadline {
        if tokio::time::timeout(Duration::from_millis(20), subscriber.recv())
            .await
            .ok()
            .flatten()
            .is_some()
        {
            seen += 1;
        }
    }
    assert!(seen > 1, "expected replay to loop past a single row, saw {seen}");

    streamer.stop().await;
    broker.shutdown().await;
}

#[tokio::test]
async fn host_filter_only_replays_matching_rows() {
    let dir = tempdir().expect("tempdir");
    let csv_path = write_csv(
        &dir.path(),
        &["gpu_0,node-a,1.0,false", "gpu_1,node-b,2.0,false"],
    );

    let broker = Arc::new(Broker::new(BrokerConfig::default()));
    let subscriber = broker.subscribe("telemetry", Mode::Acknowledged);

    let streamer = Streamer::new(
        broker.clone(),
        StreamerConfig {
            csv_path,
            workers: 1,
            rate_per_worker: 50.0,
            topic: "telemetry".to_string(),
            host_filter: Some("node-a".to_string()),
        },
    );
    streamer.start().await.expect("start");

    for _ in 0..3 {
        let Received::Ack(delivery) = subscriber.recv().await.expect("delivery") else {
            panic!("expected acknowledged delivery");
        };
        let value: serde_json::Value = serde_json::from_slice(&delivery.envelope.payload).expect("json");
        assert_eq!(value["fields"]["gpu_id"], "gpu_0");
        delivery.ack();
    }

    streamer.stop().await;
    broker.shutdown().await;
}
