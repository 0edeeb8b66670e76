//! GPU telemetry ingestion core: an in-process message broker with
//! at-least-once delivery, and a collector that consumes it into a
//! dual-layer (append-only file + bounded in-memory) query store.
//!
//! See `SPEC_FULL.md` for the module map. The three subsystems —
//! [`broker`], [`collector`], [`streamer`] — are independently feature
//! gated; `default` enables all three plus the `cli` binaries.

pub mod error;

#[cfg(feature = "broker")]
pub mod broker;

#[cfg(feature = "collector")]
pub mod collector;

#[cfg(feature = "streamer")]
pub mod streamer;

pub use error::ErrorKind;
