use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read csv source: {0}")]
    Csv(#[source] csv::Error),
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
    #[error("cannot open csv at the configured path: {0}")]
    Fatal(#[source] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Csv(_) | Error::Io(_) => ErrorKind::Transient,
            Error::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<csv::Error> for Error {
    fn from(value: csv::Error) -> Self {
        Error::Csv(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
