use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use gpu_telemetry::broker::{Broker, BrokerConfig};
use gpu_telemetry::collector::{Collector, CollectorConfig};
use log::info;
use tokio::time::interval;

/// Runs a collector worker pool against a broker in this same process.
///
/// The broker this binary constructs is private to it: cross-process
/// fan-out between a separately invoked `broker-server` and this binary
/// would need the admin/ingest HTTP façade, which this crate treats as an
/// external collaborator. Point `--mq-data-dir` at the same durable log
/// directory as the broker you want to recover from and this process
/// will replay and continue appending to it.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "telemetry")]
    mq_topic: String,

    #[arg(long, default_value_t = 4)]
    workers: usize,

    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    #[arg(long, default_value = "./checkpoints")]
    checkpoint_dir: PathBuf,

    #[arg(long, default_value_t = 1000)]
    max_entries_per_gpu: usize,

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

    let collector = Collector::new(
        CollectorConfig {
            workers: args.workers,
            topic: args.mq_topic.clone(),
            data_dir: args.data_dir,
            checkpoint_dir: args.checkpoint_dir,
            max_entries_per_gpu: args.max_entries_per_gpu,
            ..Default::default()
        },
        broker.clone(),
    )
    .context("failed to initialize collector stores")?;

    info!("starting collector: topic={} workers={}", args.mq_topic, args.workers);
    collector.start().await;

    let mut report = interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = report.tick() => {
                let stats = collector.stats();
                info!(
                    "collector stats: malformed={} memory_entries={} gpus_tracked={}",
                    stats.malformed_count, stats.memory.total_entries, stats.memory.total_gpus
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("shutdown requested; draining collector workers");
    collector.stop().await;
    broker.shutdown().await;
    info!("collector stopped");
    Ok(())
}
