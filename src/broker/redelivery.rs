//! Background redelivery tick.
//!
//! A per-inflight deadline scan rather than a timer wheel: simpler, and
//! O(inflight) per tick is cheap enough at this scale. One task per broker
//! wakes on a fixed tick (default 1s) and asks every topic to expire its
//! overdue inflight records.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::topic::TopicRegistry;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

pub(crate) fn spawn(
    registry: Arc<TopicRegistry>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(tick) => {
                    let mut dead_lettered = 0u64;
                    for topic in registry.snapshot() {
                        dead_lettered += topic.run_redelivery_tick();
                    }
                    if dead_lettered > 0 {
                        debug!("redelivery tick dead-lettered {dead_lettered} envelope(s)");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
