//! Rate-controlled CSV replayer: converts heterogeneous rows into canonical
//! telemetry envelopes and publishes them to the broker.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::{Broker, Headers};

use super::coercion::coerce_field;
use super::error::Result;

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub csv_path: PathBuf,
    pub workers: usize,
    pub rate_per_worker: f64,
    pub topic: String,
    /// If non-empty and the CSV has a `hostname` column, only rows for
    /// this host are replayed.
    pub host_filter: Option<String>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        StreamerConfig {
            csv_path: PathBuf::new(),
            workers: 1,
            rate_per_worker: 1.0,
            topic: "telemetry".to_string(),
            host_filter: None,
        }
    }
}

fn rfc3339_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Produces a filtered scratch copy of `path` containing only rows whose
/// `hostname` column equals `host`, writing it next to the original with a
/// `.filtered-<host>.csv` suffix. Falls back to the original path if the
/// column is missing or nothing matched.
fn prepare_host_filtered_source(path: &Path, host: &str) -> std::io::Result<PathBuf> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let Some(hostname_idx) = headers.iter().position(|h| h == "hostname") else {
        return Ok(path.to_path_buf());
    };

    let scratch_path = path.with_extension(format!("filtered-{host}.csv"));
    let mut writer = csv::Writer::from_path(&scratch_path)?;
    writer.write_record(&headers)?;

    let mut matched = 0usize;
    for result in reader.records() {
        let record = result?;
        if record.get(hostname_idx) == Some(host) {
            writer.write_record(&record)?;
            matched += 1;
        }
    }
    writer.flush()?;

    if matched == 0 {
        let _ = std::fs::remove_file(&scratch_path);
        return Ok(path.to_path_buf());
    }
    Ok(scratch_path)
}

fn read_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// Streams rows from `csv_path`, forever, into `topic`: one worker per
/// `config.workers`, each restarting from the top of the file on EOF.
pub struct Streamer {
    broker: Arc<Broker>,
    config: StreamerConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Streamer {
    pub fn new(broker: Arc<Broker>, config: StreamerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Streamer {
            broker,
            config,
            shutdown_tx,
            shutdown_rx,
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let source = if let Some(host) = self.config.host_filter.as_deref().filter(|h| !h.is_empty()) {
            prepare_host_filtered_source(&self.config.csv_path, host)?
        } else {
            self.config.csv_path.clone()
        };
        let header = read_header(&source)?;

        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.config.workers {
            let broker = self.broker.clone();
            let topic = self.config.topic.clone();
            let rate = self.config.rate_per_worker.max(f64::MIN_POSITIVE);
            let period = Duration::from_secs_f64(1.0 / rate);
            let source = source.clone();
            let header = header.clone();
            let mut shutdown_rx = self.shutdown_rx.clone();

            let handle = tokio::spawn(async move {
                'replay: loop {
                    let file = match File::open(&source) {
                        Ok(f) => f,
                        Err(err) => {
                            warn!("worker {worker_id} could not open csv source {}: {err}", source.display());
                            break 'replay;
                        }
                    };
                    let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

                    for result in csv_reader.records() {
                        if *shutdown_rx.borrow() {
                            break 'replay;
                        }
                        let record = match result {
                            Ok(r) => r,
                            Err(err) => {
                                warn!("worker {worker_id} skipping unparseable csv row: {err}");
                                continue;
                            }
                        };

                        let mut fields = serde_json::Map::new();
                        for (name, value) in header.iter().zip(record.iter()) {
                            fields.insert(name.clone(), coerce_field(value));
                        }
                        let payload = json!({ "timestamp": rfc3339_now(), "fields": fields });
                        let bytes = match serde_json::to_vec(&payload) {
                            Ok(b) => b,
                            Err(err) => {
                                warn!("worker {worker_id} failed to encode row as json: {err}");
                                continue;
                            }
                        };

                        // Publish failures are logged and not retried: the
                        // broker is in-process and failure here is
                        // exceptional.
                        if let Err(err) = broker.publish(&topic, bytes, Headers::new()).await {
                            warn!("worker {worker_id} publish failed: {err}");
                        }

                        tokio::select! {
                            _ = tokio::time::sleep(period) => {}
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() || *shutdown_rx.borrow() {
                                    break 'replay;
                                }
                            }
                        }
                    }

                    if *shutdown_rx.borrow() {
                        break 'replay;
                    }
                }
                info!("worker {worker_id} stopped");
            });
            handles.push(handle);
        }
        Ok(())
    }

    /// Signals every worker to stop and waits for them to drain their
    /// current row.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}
