//! Subscriber handle: bounded channel, inflight map, ack bookkeeping, and
//! the timeout-driven redelivery scan.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use super::envelope::{Delivery, Envelope};

/// Delivery mode negotiated at `subscribe()` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No ack required; the broker does not track inflight state and never
    /// redelivers. Appropriate for best-effort consumers.
    FireAndForget,
    /// Consumer must call `ack()` per envelope. Unacked envelopes are
    /// redelivered after `ack_timeout` until the retry budget is exhausted.
    Acknowledged,
}

/// What `Subscriber::recv` yields, depending on `Mode`.
pub enum Received {
    Ack(Delivery),
    Payload(Vec<u8>),
}

#[derive(Debug, Clone)]
pub(crate) struct QueueItem {
    pub envelope: Envelope,
    pub retry_count: u32,
}

#[derive(Debug)]
struct InflightRecord {
    envelope: Envelope,
    delivered_at: Instant,
    retry_count: u32,
}

#[derive(Debug, Default)]
pub struct SubscriberStats {
    pub delivered: AtomicU64,
    pub consumed: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub slow_drops: AtomicU64,
}

/// Shared state behind every clone of a `Subscriber` handle and every
/// `Delivery`'s ack capability. One instance per `subscribe()` call.
pub(crate) struct SubscriberInner {
    pub id: u64,
    pub topic: String,
    pub mode: Mode,
    pub ack_timeout: Duration,
    pub max_retries: u32,
    tx: mpsc::Sender<QueueItem>,
    rx: AsyncMutex<mpsc::Receiver<QueueItem>>,
    inflight: Mutex<HashMap<u64, InflightRecord>>,
    queued: AtomicI64,
    closed: AtomicBool,
    pub stats: SubscriberStats,
}

/// The capability a [`Delivery`] carries to acknowledge itself. Kept
/// separate from `Subscriber` so a `Delivery` can outlive the scope that
/// looked the subscriber up.
#[derive(Debug)]
pub struct AckHandle {
    inner: Arc<SubscriberInner>,
}

impl AckHandle {
    pub(crate) fn ack(&self, id: u64) {
        let removed = {
            let mut inflight = self.inner.inflight.lock().expect("inflight mutex poisoned");
            inflight.remove(&id)
        };
        if removed.is_some() {
            self.inner.stats.consumed.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(
                "ack for subscriber {} envelope {id} was a no-op (already acked or expired)",
                self.inner.id
            );
        }
    }
}

/// Per-subscribe-call handle. Cheap to clone; clones share the same
/// underlying channel and inflight map (only one clone should call
/// `recv`/`unsubscribe`, but stats and `ack` are safe from any clone).
#[derive(Clone)]
pub struct Subscriber {
    pub(crate) inner: Arc<SubscriberInner>,
}

/// Bounded channel capacity for a newly created subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

impl Subscriber {
    pub(crate) fn new(
        id: u64,
        topic: impl Into<String>,
        mode: Mode,
        ack_timeout: Duration,
        max_retries: u32,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Subscriber {
            inner: Arc::new(SubscriberInner {
                id,
                topic: topic.into(),
                mode,
                ack_timeout,
                max_retries,
                tx,
                rx: AsyncMutex::new(rx),
                inflight: Mutex::new(HashMap::new()),
                queued: AtomicI64::new(0),
                closed: AtomicBool::new(false),
                stats: SubscriberStats::default(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Enqueues an envelope for this subscriber, blocking the caller up to
    /// `publish_wait` before dropping for this subscriber only. Returns `true` if delivered, `false` if dropped.
    pub(crate) async fn enqueue(&self, envelope: &Envelope, publish_wait: Duration) -> bool {
        if self.is_closed() {
            return false;
        }
        let item = QueueItem {
            envelope: envelope.clone(),
            retry_count: 0,
        };
        match tokio::time::timeout(publish_wait, self.inner.tx.send(item)).await {
            Ok(Ok(())) => {
                self.inner.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(Err(_)) => false, // channel closed
            Err(_) => {
                self.inner
                    .stats
                    .slow_drops
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    "subscriber {} on topic {} is slow; dropping envelope {}",
                    self.inner.id, self.inner.topic, envelope.id
                );
                false
            }
        }
    }

    /// Re-enqueues an envelope produced by the redelivery scan. Best-effort:
    /// a full channel is reported back so the scan can leave the record
    /// inflight for another tick rather than lose it.
    pub(crate) fn try_redeliver(&self, envelope: Envelope, retry_count: u32) -> bool {
        let item = QueueItem {
            envelope,
            retry_count,
        };
        match self.inner.tx.try_send(item) {
            Ok(()) => {
                self.inner.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Blocks until the next message is available, or the subscriber is
    /// closed. Returns `None` once closed and drained.
    pub async fn recv(&self) -> Option<Received> {
        let item = {
            let mut rx = self.inner.rx.lock().await;
            rx.recv().await
        }?;
        self.inner.queued.fetch_sub(1, Ordering::Relaxed);
        self.inner.stats.delivered.fetch_add(1, Ordering::Relaxed);

        match self.inner.mode {
            Mode::FireAndForget => Some(Received::Payload(item.envelope.payload)),
            Mode::Acknowledged => {
                let mut inflight = self.inner.inflight.lock().expect("inflight mutex poisoned");
                inflight.insert(
                    item.envelope.id,
                    InflightRecord {
                        envelope: item.envelope.clone(),
                        delivered_at: Instant::now(),
                        retry_count: item.retry_count,
                    },
                );
                drop(inflight);
                Some(Received::Ack(Delivery {
                    envelope: item.envelope,
                    retry_count: item.retry_count,
                    ack_handle: Arc::new(AckHandle {
                        inner: self.inner.clone(),
                    }),
                }))
            }
        }
    }

    /// Removes the subscriber from future delivery, drains its inflight
    /// map (cancelling any pending redelivery for it), and closes the
    /// receive stream. No envelope is delivered to this subscriber once
    /// this returns.
    pub fn unsubscribe(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut inflight = self.inner.inflight.lock().expect("inflight mutex poisoned");
        inflight.clear();
    }

    pub fn stats(&self) -> (u64, u64, u64, u64) {
        (
            self.inner.stats.delivered.load(Ordering::Relaxed),
            self.inner.stats.consumed.load(Ordering::Relaxed),
            self.inner.stats.dead_lettered.load(Ordering::Relaxed),
            self.inner.stats.slow_drops.load(Ordering::Relaxed),
        )
    }

    pub fn pending(&self) -> i64 {
        let queued = self.inner.queued.load(Ordering::Relaxed);
        let inflight = self.inner.inflight.lock().expect("inflight mutex poisoned").len() as i64;
        queued + inflight
    }

    /// Scans the inflight map for expired records, invoked by the broker's
    /// redelivery tick. Returns the number dead-lettered this pass.
    pub(crate) fn expire_overdue(&self) -> u64 {
        if self.inner.mode != Mode::Acknowledged || self.is_closed() {
            return 0;
        }
        let now = Instant::now();
        let expired: Vec<(u64, Envelope, u32)> = {
            let inflight = self.inner.inflight.lock().expect("inflight mutex poisoned");
            inflight
                .iter()
                .filter(|(_, rec)| now.duration_since(rec.delivered_at) > self.inner.ack_timeout)
                .map(|(id, rec)| (*id, rec.envelope.clone(), rec.retry_count))
                .collect()
        };

        let mut dead_lettered = 0;
        for (id, envelope, retry_count) in expired {
            {
                let mut inflight = self.inner.inflight.lock().expect("inflight mutex poisoned");
                inflight.remove(&id);
            }
            let new_retry = retry_count + 1;
            if new_retry > self.inner.max_retries {
                self.inner
                    .stats
                    .dead_lettered
                    .fetch_add(1, Ordering::Relaxed);
                dead_lettered += 1;
                warn!(
                    "envelope {id} dead-lettered on subscriber {} after {new_retry} delivery attempts",
                    self.inner.id
                );
                continue;
            }
            if !self.try_redeliver(envelope.clone(), new_retry) {
                // Channel is full or closed; put the record back so the
                // next tick tries again without losing the retry budget.
                let mut inflight = self.inner.inflight.lock().expect("inflight mutex poisoned");
                inflight.insert(
                    id,
                    InflightRecord {
                        envelope,
                        delivered_at: Instant::now(),
                        retry_count,
                    },
                );
            }
        }
        dead_lettered
    }
}
