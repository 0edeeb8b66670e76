use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("topic name must not be empty")]
    InvalidTopic,
    #[error("durable log append failed: {0}")]
    DurableLog(#[source] std::io::Error),
    #[error("cannot create persistence directory: {0}")]
    Fatal(#[source] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidTopic => ErrorKind::Validation,
            Error::DurableLog(_) => ErrorKind::Transient,
            Error::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
