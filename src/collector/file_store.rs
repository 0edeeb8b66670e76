//! Per-GPU append-only newline-delimited JSON files.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::{Error, Result};
use super::record::TelemetryRecord;

/// One append-only file per `gpu_id`, created lazily. Writes to different
/// files proceed in parallel; writes to the same file serialize on that
/// file's mutex.
pub struct FileStore {
    data_dir: PathBuf,
    files: Mutex<HashMap<String, Mutex<File>>>,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(Error::Fatal)?;
        Ok(FileStore {
            data_dir,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_for(&self, gpu_id: &str) -> PathBuf {
        self.data_dir.join(format!("{gpu_id}.jsonl"))
    }

    /// Appends one record and flushes before returning. On any failure the
    /// caller must not ack the originating envelope: the
    /// broker will redeliver and a persistent fault eventually dead-letters
    /// the message.
    pub fn write(&self, record: &TelemetryRecord) -> Result<()> {
        let mut files = self.files.lock().expect("file store map mutex poisoned");
        let entry = match files.entry(record.gpu_id.clone()) {
            std::collections::hash_map::Entry::Occupied(occupied) => occupied.into_mut(),
            std::collections::hash_map::Entry::Vacant(vacant) => {
                let path = self.path_for(&record.gpu_id);
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(Error::FileStore)?;
                vacant.insert(Mutex::new(file))
            }
        };
        let mut file = entry.lock().expect("per-file mutex poisoned");
        let mut line = serde_json::to_vec(record).map_err(|e| Error::FileStore(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        line.push(b'\n');
        file.write_all(&line).map_err(Error::FileStore)?;
        file.flush().map_err(Error::FileStore)?;
        Ok(())
    }

    /// Reads up to `limit` records for `gpu_id`. Used only by collector-
    /// local tooling; external reads go through
    /// [`crate::collector::memory_store::MemoryStore`]. Tolerates a
    /// trailing truncated line left by a crash mid-write by skipping lines
    /// that fail to parse.
    pub fn read(&self, gpu_id: &str, limit: usize, newest_first: bool) -> Result<Vec<TelemetryRecord>> {
        let path = self.path_for(gpu_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).map_err(Error::FileStore)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(Error::FileStore)?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<TelemetryRecord>(&line) {
                records.push(record);
            }
        }
        if newest_first {
            records.reverse();
        }
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use tempfile::tempdir;

    fn record(gpu_id: &str, ts: &str) -> TelemetryRecord {
        let mut metrics = Map::new();
        metrics.insert("utilization".to_string(), 85.0);
        TelemetryRecord {
            gpu_id: gpu_id.to_string(),
            hostname: None,
            metrics,
            timestamp: ts.to_string(),
        }
    }

    #[test]
    fn write_then_read_last_line_matches() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::new(dir.path()).expect("new");
        store.write(&record("gpu_0", "2025-01-01T00:00:00Z")).expect("write 1");
        store.write(&record("gpu_0", "2025-01-01T00:00:01Z")).expect("write 2");

        let newest_first = store.read("gpu_0", 10, true).expect("read");
        assert_eq!(newest_first.len(), 2);
        assert_eq!(newest_first[0].timestamp, "2025-01-01T00:00:01Z");
    }

    #[test]
    fn different_gpus_land_in_different_files() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::new(dir.path()).expect("new");
        store.write(&record("gpu_0", "t0")).expect("write gpu_0");
        store.write(&record("gpu_1", "t0")).expect("write gpu_1");
        assert!(store.path_for("gpu_0").exists());
        assert!(store.path_for("gpu_1").exists());
    }

    #[test]
    fn read_tolerates_trailing_truncated_line() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::new(dir.path()).expect("new");
        store.write(&record("gpu_0", "t0")).expect("write");
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(store.path_for("gpu_0"))
                .unwrap();
            write!(file, "{{\"gpu_id\":\"gpu_0\",\"metr").unwrap();
        }
        let records = store.read("gpu_0", 10, false).expect("read");
        assert_eq!(records.len(), 1);
    }
}
