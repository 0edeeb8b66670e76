//! CSV → broker ingress: header-driven row conversion, per-worker rate
//! limiting, infinite replay.

mod coercion;
mod error;
mod replayer;

pub use coercion::coerce_field;
pub use error::{Error, Result};
pub use replayer::{Streamer, StreamerConfig};
