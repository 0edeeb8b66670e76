//! Topic registry: lazy creation, subscriber fan-out, counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use super::envelope::Envelope;
use super::subscriber::{Mode, Subscriber};

/// Snapshot of a single topic's counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TopicStats {
    pub published: u64,
    pub delivered: u64,
    pub consumed: u64,
    pub pending: u64,
    pub subscribers: u64,
    pub dead_lettered: u64,
    pub slow_subscriber_drops: u64,
}

#[derive(Debug, Default)]
struct TopicCounters {
    published: AtomicU64,
}

/// One named channel. Owns its subscriber list; the broker owns the
/// registry mapping names to `Topic`s.
pub struct Topic {
    pub name: String,
    subscribers: Mutex<Vec<Subscriber>>,
    counters: TopicCounters,
}

impl Topic {
    fn new(name: impl Into<String>) -> Self {
        Topic {
            name: name.into(),
            subscribers: Mutex::new(Vec::new()),
            counters: TopicCounters::default(),
        }
    }

    pub(crate) fn add_subscriber(&self, subscriber: Subscriber) {
        self.subscribers
            .lock()
            .expect("subscribers mutex poisoned")
            .push(subscriber);
    }

    pub(crate) fn remove_subscriber(&self, id: u64) {
        let mut subs = self.subscribers.lock().expect("subscribers mutex poisoned");
        subs.retain(|s| s.id() != id);
    }

    pub(crate) fn subscribers_snapshot(&self) -> Vec<Subscriber> {
        self.subscribers
            .lock()
            .expect("subscribers mutex poisoned")
            .clone()
    }

    /// Fans `envelope` out to every current subscriber independently: a
    /// slow subscriber only affects its own delivery.
    pub(crate) async fn publish(&self, envelope: &Envelope, publish_wait: Duration) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.republish(envelope, publish_wait).await;
    }

    /// Fans `envelope` out without touching the `published` counter, used
    /// by durable-log recovery to re-deliver previously logged envelopes
    /// without double-counting them.
    pub(crate) async fn republish(&self, envelope: &Envelope, publish_wait: Duration) {
        let subs = self.subscribers_snapshot();
        for sub in subs {
            sub.enqueue(envelope, publish_wait).await;
        }
    }

    pub fn stats(&self) -> TopicStats {
        let subs = self.subscribers_snapshot();
        let mut delivered = 0u64;
        let mut consumed = 0u64;
        let mut dead_lettered = 0u64;
        let mut slow_drops = 0u64;
        let mut pending = 0u64;
        for sub in &subs {
            let (d, c, dl, sd) = sub.stats();
            delivered += d;
            consumed += c;
            dead_lettered += dl;
            slow_drops += sd;
            pending += sub.pending().max(0) as u64;
        }
        TopicStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered,
            consumed,
            pending,
            subscribers: subs.len() as u64,
            dead_lettered,
            slow_subscriber_drops: slow_drops,
        }
    }

    pub(crate) fn run_redelivery_tick(&self) -> u64 {
        let subs = self.subscribers_snapshot();
        subs.iter()
            .filter(|s| s.mode() == Mode::Acknowledged)
            .map(|s| s.expire_overdue())
            .sum()
    }
}

/// Owns every topic, keyed by name. Protected by a single mutex, held only
/// during create/lookup, never during delivery.
#[derive(Default)]
pub(crate) struct TopicRegistry {
    topics: Mutex<HashMap<String, std::sync::Arc<Topic>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a topic, creating it lazily if this is the first reference.
    pub fn get_or_create(&self, name: &str) -> std::sync::Arc<Topic> {
        let mut topics = self.topics.lock().expect("topic registry mutex poisoned");
        topics
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(Topic::new(name)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<Topic>> {
        self.topics
            .lock()
            .expect("topic registry mutex poisoned")
            .get(name)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<std::sync::Arc<Topic>> {
        self.topics
            .lock()
            .expect("topic registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}
