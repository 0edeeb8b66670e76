use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum Error {
    /// Not JSON, missing `gpu_id`, or otherwise poison.
    #[error("malformed telemetry payload: {0}")]
    Malformed(String),
    #[error("file store write failed: {0}")]
    FileStore(#[source] std::io::Error),
    #[error("checkpoint write failed: {0}")]
    Checkpoint(#[source] std::io::Error),
    #[error("cannot create data directory: {0}")]
    Fatal(#[source] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Malformed(_) => ErrorKind::Validation,
            Error::FileStore(_) | Error::Checkpoint(_) => ErrorKind::Transient,
            Error::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
