use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gpu_telemetry::broker::{Broker, BrokerConfig};
use gpu_telemetry::streamer::{Streamer, StreamerConfig};
use log::info;

/// Replays a CSV file into a broker topic at a fixed per-worker rate,
/// forever, until interrupted. See `collector`'s doc comment for how this
/// binary's private broker relates to a separately run `broker-server`.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long)]
    csv: PathBuf,

    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Rows per second, per worker.
    #[arg(long, default_value_t = 1.0)]
    rate: f64,

    #[arg(long, default_value = "telemetry")]
    mq_topic: String,

    /// Only replay rows whose `hostname` column matches this value.
    #[arg(long)]
    host_filter: Option<String>,

    #[arg(long, default_value = "./mq-data")]
    mq_data_dir: PathBuf,

    #[arg(long, default_value_t = true)]
    mq_persistence: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let broker_config = BrokerConfig {
        persistence_enabled: args.mq_persistence,
        persistence_dir: args.mq_data_dir,
        ..Default::default()
    };
    let broker = Arc::new(Broker::new(broker_config));
    broker.recover().await.context("durable log recovery failed")?;

    let streamer = Streamer::new(
        broker.clone(),
        StreamerConfig {
            csv_path: args.csv.clone(),
            workers: args.workers,
            rate_per_worker: args.rate,
            topic: args.mq_topic.clone(),
            host_filter: args.host_filter,
        },
    );

    info!(
        "starting streamer: csv={} topic={} workers={} rate={}/s",
        args.csv.display(),
        args.mq_topic,
        args.workers,
        args.rate
    );
    streamer.start().await.context("failed to start streamer")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested; draining streamer workers");
    streamer.stop().await;
    broker.shutdown().await;
    info!("streamer stopped");
    Ok(())
}
