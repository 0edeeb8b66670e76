//! Optional durable write-ahead log for published envelopes.
//!
//! One file per topic under `<persistence_dir>/<topic>.log`, newline
//! delimited JSON, append-only. NDJSON was chosen over a length-prefixed
//! binary format: it is self-delimiting, a trailing truncated line is
//! trivially detected and skipped, and it needs no extra crate beyond
//! `serde_json`, which this crate already carries for the telemetry path.
//!
//! # Durability mode
//!
//! `Durability::Strong` calls `File::sync_data` after every append, so a
//! publish the broker has already durable-logged survives a crash before
//! the caller is notified. `Durability::Weak` batches: the OS page cache
//! absorbs writes and an `fsync` only happens on an explicit `flush()` or
//! at shutdown. This crate defaults to `Weak` and documents the choice in
//! `DESIGN.md`.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::envelope::{Envelope, Headers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Weak,
    Strong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub topic: String,
    pub id: u64,
    pub timestamp: i64,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl From<&Envelope> for LogRecord {
    fn from(e: &Envelope) -> Self {
        LogRecord {
            topic: e.topic.clone(),
            id: e.id,
            timestamp: e.timestamp,
            payload: e.payload.clone(),
            headers: e.headers.clone(),
        }
    }
}

impl LogRecord {
    pub fn into_envelope(self) -> Envelope {
        Envelope {
            id: self.id,
            topic: self.topic,
            payload: self.payload,
            timestamp: self.timestamp,
            headers: self.headers,
        }
    }
}

/// Append-only per-topic log file.
pub struct DurableLog {
    dir: PathBuf,
    durability: Durability,
    file: Mutex<File>,
}

impl DurableLog {
    pub fn open(dir: impl AsRef<Path>, topic: &str, durability: Durability) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{topic}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(DurableLog {
            dir,
            durability,
            file: Mutex::new(file),
        })
    }

    pub fn path_for(dir: impl AsRef<Path>, topic: &str) -> PathBuf {
        dir.as_ref().join(format!("{topic}.log"))
    }

    /// Appends one record. On `Durability::Strong` this blocks until the
    /// write is durable on disk; publish must not ack the caller until this
    /// returns in that mode.
    pub fn append(&self, record: &LogRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().expect("durable log mutex poisoned");
        file.write_all(&line)?;
        if self.durability == Durability::Strong {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Best-effort flush for `Weak` durability; called at graceful
    /// shutdown.
    pub fn flush(&self) -> io::Result<()> {
        let file = self.file.lock().expect("durable log mutex poisoned");
        file.sync_data()
    }

    /// Replays every well-formed record in publish order. A trailing
    /// truncated line (crash mid-write) is logged and ignored rather than
    /// treated as a fatal parse error.
    pub fn replay(dir: impl AsRef<Path>, topic: &str) -> io::Result<Vec<LogRecord>> {
        let path = Self::path_for(&dir, topic);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    log::warn!("skipping truncated/corrupt durable log line for topic {topic}: {err}");
                }
            }
        }
        Ok(records)
    }

    /// Lists topics with an existing log file under `dir`, for recovery at
    /// broker start-up.
    pub fn discover_topics(dir: impl AsRef<Path>) -> io::Result<Vec<String>> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut topics = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("log") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    topics.push(stem.to_string());
                }
            }
        }
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_replay_round_trip() {
        let dir = tempdir().expect("tempdir");
        let log = DurableLog::open(dir.path(), "telemetry", Durability::Strong).expect("open");

        let envelope = Envelope::new(1, "telemetry", b"payload-a".to_vec(), Headers::new());
        log.append(&LogRecord::from(&envelope)).expect("append a");
        let envelope2 = Envelope::new(2, "telemetry", b"payload-b".to_vec(), Headers::new());
        log.append(&LogRecord::from(&envelope2)).expect("append b");

        let replayed = DurableLog::replay(dir.path(), "telemetry").expect("replay");
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].id, 1);
        assert_eq!(replayed[1].payload, b"payload-b");
    }

    #[test]
    fn replay_skips_truncated_trailing_line() {
        let dir = tempdir().expect("tempdir");
        let path = DurableLog::path_for(dir.path(), "telemetry");
        std::fs::create_dir_all(dir.path()).unwrap();
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"topic":"telemetry","id":1,"timestamp":0,"payload":[1,2],"headers":{{}}}}"#).unwrap();
        write!(file, r#"{{"topic":"telemetry","id":2,"timesta"#).unwrap(); // truncated

        let replayed = DurableLog::replay(dir.path(), "telemetry").expect("replay");
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].id, 1);
    }

    #[test]
    fn discover_topics_lists_log_files() {
        let dir = tempdir().expect("tempdir");
        DurableLog::open(dir.path(), "a", Durability::Weak).unwrap();
        DurableLog::open(dir.path(), "b", Durability::Weak).unwrap();
        let mut topics = DurableLog::discover_topics(dir.path()).unwrap();
        topics.sort();
        assert_eq!(topics, vec!["a".to_string(), "b".to_string()]);
    }
}
