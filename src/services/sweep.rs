//! Sweep service — periodic reaping of stale strokes.
//!
//! DESIGN
//! ======
//! A background task wakes on a fixed interval, independent of client
//! activity, and removes ended strokes past their retention window and
//! strokes that never received a `line_end`. This bounds memory even when
//! clients vanish mid-gesture or their grace-delay timers were lost.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::services::strokes::StrokeStore;

/// Spawn the background sweep task. Returns a handle for shutdown.
pub fn spawn_sweep_task(strokes: StrokeStore, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep_once(&strokes).await;
        }
    })
}

/// Run one sweep pass. Returns the number of strokes removed.
pub async fn sweep_once(strokes: &StrokeStore) -> usize {
    let removed = strokes.sweep(Instant::now()).await;
    if removed > 0 {
        let remaining = strokes.len().await;
        info!(removed, remaining, "sweep: removed stale strokes");
    }
    removed
}

#[cfg(test)]
#[path = "sweep_test.rs"]
mod tests;
