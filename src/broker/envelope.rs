//! Wire form of a published message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// String-keyed, string-valued header bag carried alongside a publish.
pub type Headers = HashMap<String, String>;

/// Allocates envelope ids that are unique for the lifetime of one broker
/// process. A counter needs no extra dependency and gives redelivery a
/// total order for free, which the dead-letter accounting in
/// [`crate::broker::redelivery`] relies on when logging.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// A single message as seen by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    /// Broker-assigned publish time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub headers: Headers,
}

impl Envelope {
    pub fn new(id: u64, topic: impl Into<String>, payload: Vec<u8>, headers: Headers) -> Self {
        Self {
            id,
            topic: topic.into(),
            payload,
            timestamp: now_millis(),
            headers,
        }
    }

    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A delivered envelope paired with the capability to acknowledge it.
///
/// The ack capability is a first-class value attached to the delivered
/// record rather than a closure kept in a side map, so it survives a
/// channel hop intact. `Delivery` is that value: it carries the envelope
/// by value and an `Arc` back to the subscriber's inflight bookkeeping,
/// and `ack()` is the only way to retire it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Envelope,
    pub(crate) retry_count: u32,
    pub(crate) ack_handle: Arc<super::subscriber::AckHandle>,
}

impl Delivery {
    /// Acknowledges successful processing. Idempotent: calling this more
    /// than once for the same envelope id is a no-op after the first call,
    /// and acking an id the broker already expired and redelivered under a
    /// new inflight record is also a no-op.
    pub fn ack(&self) {
        self.ack_handle.ack(self.envelope.id);
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}
