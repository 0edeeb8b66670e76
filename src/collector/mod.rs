//! Subscriber worker pool that turns broker envelopes into a dual-layer
//! (append-only file + bounded in-memory) query store.

mod checkpoint;
mod error;
mod file_store;
mod memory_store;
mod record;

pub use checkpoint::{worker_key, Checkpoint, CheckpointStore};
pub use error::{Error, Result};
pub use file_store::FileStore;
pub use memory_store::{MemoryStore, MemoryStoreStats};
pub use record::{parse_envelope, TelemetryRecord};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::{Broker, Mode, Received};

pub const DEFAULT_CHECKPOINT_EVERY: u64 = 100;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub workers: usize,
    pub topic: String,
    pub data_dir: PathBuf,
    pub max_entries_per_gpu: usize,
    pub checkpoint_enabled: bool,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_every: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            workers: 4,
            topic: "telemetry".to_string(),
            data_dir: PathBuf::from("./data"),
            max_entries_per_gpu: 1000,
            checkpoint_enabled: true,
            checkpoint_dir: PathBuf::from("./checkpoints"),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
        }
    }
}

impl CollectorConfig {
    /// Checkpoints after every message instead of every 100 — useful for
    /// tests and low-volume deployments where staleness matters more than
    /// the write amplification.
    pub fn fast_checkpoint(mut self) -> Self {
        self.checkpoint_every = 1;
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct CollectorStats {
    pub malformed_count: u64,
    pub memory: MemoryStoreStats,
}

/// Owns `FileStore`, `MemoryStore`, and `CheckpointStore`; subscribes N
/// workers to the broker and never mutates broker state other than
/// calling `ack()` on envelopes it successfully processed.
pub struct Collector {
    config: CollectorConfig,
    broker: Arc<Broker>,
    file_store: Arc<FileStore>,
    memory_store: Arc<MemoryStore>,
    checkpoint_store: Option<Arc<CheckpointStore>>,
    malformed_count: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    worker_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Collector {
    pub fn new(config: CollectorConfig, broker: Arc<Broker>) -> Result<Self> {
        let file_store = Arc::new(FileStore::new(&config.data_dir)?);
        let memory_store = Arc::new(MemoryStore::new(config.max_entries_per_gpu));
        let checkpoint_store = if config.checkpoint_enabled {
            Some(Arc::new(CheckpointStore::new(&config.checkpoint_dir)?))
        } else {
            None
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Collector {
            config,
            broker,
            file_store,
            memory_store,
            checkpoint_store,
            malformed_count: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
            shutdown_rx,
            worker_handles: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn memory_store(&self) -> Arc<MemoryStore> {
        self.memory_store.clone()
    }

    pub fn file_store(&self) -> Arc<FileStore> {
        self.file_store.clone()
    }

    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            malformed_count: self.malformed_count.load(Ordering::Relaxed),
            memory: self.memory_store.stats(),
        }
    }

    /// Subscribes `config.workers` acknowledged-mode consumers to
    /// `config.topic` and starts their processing loops.
    pub async fn start(&self) {
        let mut handles = self.worker_handles.lock().await;
        for index in 0..self.config.workers {
            let subscriber = self.broker.subscribe(&self.config.topic, Mode::Acknowledged);
            let broker = self.broker.clone();
            let file_store = self.file_store.clone();
            let memory_store = self.memory_store.clone();
            let checkpoint_store = self.checkpoint_store.clone();
            let malformed_count = self.malformed_count.clone();
            let checkpoint_every = self.config.checkpoint_every;
            let mut shutdown_rx = self.shutdown_rx.clone();

            let key = worker_key(index);
            let starting_count = checkpoint_store
                .as_ref()
                .map(|store| store.load(&key))
                .unwrap_or(0);
            info!("worker {index} starting from checkpoint processed_count={starting_count}");

            let handle = tokio::spawn(async move {
                let mut processed = starting_count;
                loop {
                    let received = tokio::select! {
                        received = subscriber.recv() => received,
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                None
                            } else {
                                continue;
                            }
                        }
                    };

                    let Some(Received::Ack(delivery)) = received else {
                        break;
                    };

                    match parse_envelope(&delivery.envelope.payload, delivery.envelope.timestamp) {
                        Ok(record) => match file_store.write(&record) {
                            Ok(()) => {
                                memory_store.store(record);
                                delivery.ack();
                                processed += 1;
                                if let Some(store) = &checkpoint_store {
                                    if processed as u64 % checkpoint_every == 0 {
                                        if let Err(err) = store.update(&key, processed) {
                                            warn!("worker {index} failed to write checkpoint: {err}");
                                        }
                                    }
                                }
                            }
                            Err(err) => {
                                warn!(
                                    "worker {index} file store write failed for gpu {}: {err}; leaving envelope {} unacked",
                                    record.gpu_id, delivery.envelope.id
                                );
                            }
                        },
                        Err(err) => {
                            malformed_count.fetch_add(1, Ordering::Relaxed);
                            debug!("worker {index} acking malformed envelope {}: {err}", delivery.envelope.id);
                            delivery.ack();
                        }
                    }
                }

                broker.unsubscribe(&subscriber);
                if let Some(store) = &checkpoint_store {
                    if let Err(err) = store.update(&key, processed) {
                        warn!("worker {index} failed to write final checkpoint: {err}");
                    }
                }
                info!("worker {index} stopped at processed_count={processed}");
            });
            handles.push(handle);
        }
    }

    /// Cancels every worker context. Each worker finishes its current
    /// envelope (ack or not) and returns; checkpoints are flushed;
    /// subscriber handles are closed.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut handles = self.worker_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}
