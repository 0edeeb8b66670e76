//! Bounded per-GPU ring of recent telemetry, kept in memory for fast
//! queries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use serde::Serialize;

use super::record::TelemetryRecord;

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStoreStats {
    pub total_entries: usize,
    pub total_gpus: usize,
    pub per_gpu_counts: HashMap<String, usize>,
}

struct Inner {
    rings: HashMap<String, VecDeque<TelemetryRecord>>,
    hosts: HashMap<String, HashSet<String>>,
}

/// A single reader-writer lock guards both the per-GPU rings and the host
/// index; no lock is held across I/O since this store never touches disk.
pub struct MemoryStore {
    max_entries_per_gpu: usize,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(max_entries_per_gpu: usize) -> Self {
        MemoryStore {
            max_entries_per_gpu: max_entries_per_gpu.max(1),
            inner: RwLock::new(Inner {
                rings: HashMap::new(),
                hosts: HashMap::new(),
            }),
        }
    }

    /// O(1) amortized insertion; evicts the oldest entry once the ring
    /// exceeds capacity.
    pub fn store(&self, record: TelemetryRecord) {
        let mut inner = self.inner.write().expect("memory store lock poisoned");
        if let Some(hostname) = record.hostname.clone() {
            inner
                .hosts
                .entry(hostname)
                .or_default()
                .insert(record.gpu_id.clone());
        }
        let ring = inner.rings.entry(record.gpu_id.clone()).or_default();
        ring.push_back(record);
        while ring.len() > self.max_entries_per_gpu {
            ring.pop_front();
        }
    }

    /// Returns up to `limit` records for `gpu_id`, most-recent-first.
    pub fn get(&self, gpu_id: &str, limit: usize) -> Vec<TelemetryRecord> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        match inner.rings.get(gpu_id) {
            Some(ring) => ring.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn list_gpus(&self) -> Vec<String> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        let mut gpus: Vec<String> = inner.rings.keys().cloned().collect();
        gpus.sort();
        gpus
    }

    pub fn list_hosts(&self) -> Vec<String> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        let mut hosts: Vec<String> = inner.hosts.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    pub fn gpus_for_host(&self, hostname: &str) -> Vec<String> {
        let inner = self.inner.read().expect("memory store lock poisoned");
        let mut gpus: Vec<String> = inner
            .hosts
            .get(hostname)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        gpus.sort();
        gpus
    }

    pub fn stats(&self) -> MemoryStoreStats {
        let inner = self.inner.read().expect("memory store lock poisoned");
        let per_gpu_counts: HashMap<String, usize> = inner
            .rings
            .iter()
            .map(|(gpu, ring)| (gpu.clone(), ring.len()))
            .collect();
        MemoryStoreStats {
            total_entries: per_gpu_counts.values().sum(),
            total_gpus: per_gpu_counts.len(),
            per_gpu_counts,
        }
    }
}
