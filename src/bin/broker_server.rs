use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use gpu_telemetry::broker::{Broker, BrokerConfig, Durability};
use log::info;

/// Runs the topic-based pub/sub broker core. The admin HTTP surface is a
/// thin façade layered on top of
/// `Broker::stats`/`Broker::topic_stats`/`Broker::publish` by an external
/// collaborator; this binary only keeps the broker alive.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Admin HTTP port (reserved for an external façade; unused by this
    /// binary directly).
    #[arg(long, default_value_t = 9090)]
    http_port: u16,

    #[arg(long, default_value_t = true)]
    persistence: bool,

    #[arg(long, default_value = "./mq-data")]
    persistence_dir: PathBuf,

    /// Ack timeout, e.g. "30s".
    #[arg(long, default_value = "30s")]
    ack_timeout: String,

    #[arg(long, default_value_t = 3)]
    max_retries: u32,
}

fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Some(secs) = raw.strip_suffix('s') {
        return Ok(Duration::from_secs_f64(secs.parse()?));
    }
    if let Some(ms) = raw.strip_suffix("ms") {
        return Ok(Duration::from_millis(ms.parse()?));
    }
    Ok(Duration::from_secs_f64(raw.parse()?))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = BrokerConfig {
        ack_timeout: parse_duration(&args.ack_timeout).context("invalid --ack-timeout")?,
        max_retries: args.max_retries,
        persistence_enabled: args.persistence,
        persistence_dir: args.persistence_dir,
        durability: Durability::Weak,
        ..Default::default()
    };

    info!(
        "starting broker: admin_http_port={} persistence={} persistence_dir={}",
        args.http_port,
        config.persistence_enabled,
        config.persistence_dir.display()
    );

    let broker = Arc::new(Broker::new(config));
    broker.recover().await.context("durable log recovery failed")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested; draining broker");
    broker.shutdown().await;
    info!("broker stopped");
    Ok(())
}
