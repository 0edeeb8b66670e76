//! Broker-wide stats snapshot, aggregated across every topic.

use std::collections::HashMap;

use serde::Serialize;

use super::topic::TopicStats;

#[derive(Debug, Clone, Default, Serialize)]
pub struct BrokerStats {
    pub topics: HashMap<String, TopicStats>,
    pub total_messages: u64,
    /// Milliseconds since the Unix epoch, matching `Envelope::timestamp`.
    pub timestamp: i64,
}
