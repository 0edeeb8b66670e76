//! Topic-based pub/sub broker with per-subscriber acknowledgment,
//! timeout-driven redelivery, optional durable logging, and bounded retry.
//!
//! This file is the façade over the broker submodules: `publish`,
//! `subscribe`, `stats`, `topic_stats`.

mod durable_log;
mod envelope;
mod error;
mod redelivery;
mod subscriber;
mod topic;

pub use durable_log::Durability;
pub use envelope::{Delivery, Envelope, Headers};
pub use error::{Error, Result};
pub use subscriber::{Mode, Received, Subscriber, DEFAULT_CHANNEL_CAPACITY};
pub use topic::TopicStats;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;
use tokio::sync::watch;

use durable_log::{DurableLog, LogRecord};
use envelope::IdAllocator;
use stats::BrokerStats;
use topic::TopicRegistry;

pub mod stats;

/// Default bounded block on a full subscriber channel before the broker
/// drops the envelope for that subscriber.
pub const DEFAULT_PUBLISH_WAIT: Duration = Duration::from_millis(50);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub ack_timeout: Duration,
    pub max_retries: u32,
    pub channel_capacity: usize,
    pub publish_wait: Duration,
    pub redelivery_tick: Duration,
    pub persistence_enabled: bool,
    pub persistence_dir: PathBuf,
    pub durability: Durability,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            publish_wait: DEFAULT_PUBLISH_WAIT,
            redelivery_tick: redelivery::DEFAULT_TICK,
            persistence_enabled: false,
            persistence_dir: PathBuf::from("./mq-data"),
            durability: Durability::Weak,
        }
    }
}

impl BrokerConfig {
    /// fsync-per-publish durability: a publish only returns once the
    /// envelope is on disk. Use when the caller cannot tolerate losing an
    /// acknowledged publish across a crash.
    pub fn strong_durability(persistence_dir: impl Into<PathBuf>) -> Self {
        BrokerConfig {
            persistence_enabled: true,
            persistence_dir: persistence_dir.into(),
            durability: Durability::Strong,
            ..Default::default()
        }
    }
}

/// The broker. Instantiable, no global state;
/// callers hold it behind whatever sharing they need (typically `Arc`).
pub struct Broker {
    config: BrokerConfig,
    registry: Arc<TopicRegistry>,
    id_alloc: IdAllocator,
    logs: Mutex<HashMap<String, Arc<DurableLog>>>,
    shutdown_tx: watch::Sender<bool>,
    redelivery_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let registry = Arc::new(TopicRegistry::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let redelivery_handle = redelivery::spawn(registry.clone(), config.redelivery_tick, shutdown_rx);
        Broker {
            config,
            registry,
            id_alloc: IdAllocator::new(),
            logs: Mutex::new(HashMap::new()),
            shutdown_tx,
            redelivery_handle: Mutex::new(Some(redelivery_handle)),
            shut_down: AtomicBool::new(false),
        }
    }

    fn log_for(&self, topic: &str) -> Result<Arc<DurableLog>> {
        let mut logs = self.logs.lock().expect("durable log map mutex poisoned");
        if let Some(log) = logs.get(topic) {
            return Ok(log.clone());
        }
        let log = Arc::new(
            DurableLog::open(&self.config.persistence_dir, topic, self.config.durability)
                .map_err(Error::DurableLog)?,
        );
        logs.insert(topic.to_string(), log.clone());
        Ok(log)
    }

    /// Publishes `payload` to `topic`, returning the envelope id.
    ///
    /// Fails only with `Error::InvalidTopic`; an absent topic is created
    /// lazily. If durable persistence is enabled, the envelope is appended
    /// and (in `Durability::Strong` mode) fsynced before fan-out begins.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, headers: Headers) -> Result<u64> {
        if topic.is_empty() {
            return Err(Error::InvalidTopic);
        }
        let id = self.id_alloc.next();
        let envelope = Envelope::new(id, topic, payload, headers);

        if self.config.persistence_enabled {
            let log = self.log_for(topic)?;
            log.append(&LogRecord::from(&envelope)).map_err(Error::DurableLog)?;
        }

        let topic_handle = self.registry.get_or_create(topic);
        topic_handle.publish(&envelope, self.config.publish_wait).await;
        Ok(id)
    }

    /// Registers a new subscriber under `topic` using the broker-wide
    /// default ack timeout and retry budget.
    pub fn subscribe(&self, topic: &str, mode: Mode) -> Subscriber {
        self.subscribe_with(topic, mode, self.config.ack_timeout, self.config.max_retries)
    }

    /// Registers a new subscriber with a per-subscriber ack timeout
    /// override.
    pub fn subscribe_with(
        &self,
        topic: &str,
        mode: Mode,
        ack_timeout: Duration,
        max_retries: u32,
    ) -> Subscriber {
        let topic_handle = self.registry.get_or_create(topic);
        let id = self.id_alloc.next();
        let subscriber = Subscriber::new(
            id,
            topic,
            mode,
            ack_timeout,
            max_retries,
            self.config.channel_capacity,
        );
        topic_handle.add_subscriber(subscriber.clone());
        subscriber
    }

    /// Unregisters `subscriber`: drains its inflight map, stops future
    /// delivery, and closes its receive stream.
    pub fn unsubscribe(&self, subscriber: &Subscriber) {
        subscriber.unsubscribe();
        if let Some(topic) = self.registry.get(&subscriber.inner.topic) {
            topic.remove_subscriber(subscriber.id());
        }
    }

    pub fn stats(&self) -> BrokerStats {
        let mut topics = HashMap::new();
        let mut total = 0u64;
        for topic in self.registry.snapshot() {
            let stats = topic.stats();
            total += stats.published;
            topics.insert(topic.name.clone(), stats);
        }
        BrokerStats {
            topics,
            total_messages: total,
            timestamp: envelope::now_millis(),
        }
    }

    pub fn topic_stats(&self, topic: &str) -> Option<TopicStats> {
        self.registry.get(topic).map(|t| t.stats())
    }

    /// Replays every durably logged envelope and re-fans it out to
    /// whichever subscribers are currently registered. Call once at start-up, after creating the broker
    /// but before — or concurrently with — subscribers registering; any
    /// subscriber not yet registered simply misses the replay, consistent
    /// with "fan-out after recovery" being best-effort for late joiners.
    pub async fn recover(&self) -> Result<()> {
        if !self.config.persistence_enabled {
            return Ok(());
        }
        let topics = DurableLog::discover_topics(&self.config.persistence_dir).map_err(Error::DurableLog)?;
        for topic_name in topics {
            let records = DurableLog::replay(&self.config.persistence_dir, &topic_name).map_err(Error::DurableLog)?;
            if records.is_empty() {
                continue;
            }
            info!("recovering {} durable record(s) for topic {topic_name}", records.len());
            let topic_handle = self.registry.get_or_create(&topic_name);
            for record in records {
                let envelope = record.into_envelope();
                topic_handle.republish(&envelope, self.config.publish_wait).await;
            }
        }
        Ok(())
    }

    /// Graceful shutdown, bottom-up: stop the redelivery scan, then flush
    /// the durable log. Callers are responsible for the
    /// layers above this (stopping ingestion, draining collector workers)
    /// since those are owned by collaborators, not the broker itself.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.redelivery_handle.lock().expect("redelivery handle mutex poisoned").take() {
            let _ = handle.await;
        }
        let logs = self.logs.lock().expect("durable log map mutex poisoned");
        for durable_log in logs.values() {
            if let Err(err) = durable_log.flush() {
                log::warn!("failed to flush durable log on shutdown: {err}");
            }
        }
    }
}
