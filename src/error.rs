//! Crate-wide error taxonomy.
//!
//! Broker and collector each expose their own `Error` enum (see
//! [`crate::broker::Error`] and [`crate::collector::Error`]); both follow the
//! same shape so callers can match on kind without caring which subsystem
//! raised it. Validation errors are boundary rejections, transient errors
//! are retried by the caller (broker redelivery, in the collector's case),
//! capacity errors are counted rather than fatal, and fatal errors abort
//! start-up.

use std::fmt;

/// Broad error kind, shared by every subsystem's concrete `Error` enum via
/// [`ErrorKind`] accessors. Used by façades (out of core scope) to map
/// errors onto transport status codes without inspecting variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected at the boundary: empty topic, missing `gpu_id`, malformed
    /// payload. Never retried.
    Validation,
    /// I/O or downstream failure that the caller should retry (broker
    /// redelivery for the collector's file-store writes).
    Transient,
    /// Bounded-resource pressure: full subscriber channel, exhausted retry
    /// budget. Counted, not escalated.
    Capacity,
    /// Cannot continue running: bind failure, missing data directory.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}
