//! Advisory per-worker progress checkpoints.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub processed_count: i64,
    pub updated_at: String,
}

/// Writes checkpoints atomically (temp file + rename) under
/// `<checkpoint_dir>/worker-<n>.json`. The stored `processed_count` is
/// advisory only — the broker, not this store, is the source of truth for
/// what has been delivered.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(Error::Fatal)?;
        Ok(CheckpointStore { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Loads the checkpoint for `key`, or `0` if none exists yet.
    pub fn load(&self, key: &str) -> i64 {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Checkpoint>(&bytes)
                .map(|c| c.processed_count)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Writes `processed_count` for `key`, replacing the temp file into
    /// place so a reader never observes a partial write.
    pub fn update(&self, key: &str, processed_count: i64) -> Result<()> {
        let checkpoint = Checkpoint {
            processed_count,
            updated_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()),
        };
        let bytes = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| Error::Checkpoint(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let final_path = self.path_for(key);
        let tmp_path = self.tmp_path_for(key);
        std::fs::write(&tmp_path, &bytes).map_err(Error::Checkpoint)?;
        std::fs::rename(&tmp_path, &final_path).map_err(Error::Checkpoint)?;
        Ok(())
    }

    fn tmp_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json.tmp"))
    }
}

pub fn worker_key(worker_index: usize) -> String {
    format!("worker-{worker_index}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_absent_checkpoint_returns_zero() {
        let dir = tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path()).expect("new");
        assert_eq!(store.load(&worker_key(0)), 0);
    }

    #[test]
    fn update_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path()).expect("new");
        store.update(&worker_key(0), 137).expect("update");
        assert_eq!(store.load(&worker_key(0)), 137);
        assert!(!store.tmp_path_for(&worker_key(0)).exists());
    }
}
