// src/runtime/reaper.rs
//! Idle reaper: background sweep over running sessions
//!
//! Sweeps on a period deliberately coarser than the IPC poll and stops
//! every session whose last IPC activity is older than the idle window.
//! Races benignly with the hard timeout: whichever fires first wins, the
//! loser's stop call no-ops against the already-terminal session.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::runtime::lifecycle::LifecycleManager;

/// Periodically stops sessions that have gone idle
pub struct IdleReaper {
    manager: Arc<LifecycleManager>,
    sweep_interval: Duration,
}

impl IdleReaper {
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        let sweep_interval = manager.config().reaper_sweep_interval;
        Self {
            manager,
            sweep_interval,
        }
    }

    /// Run until the shutdown token fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(
            sweep_ms = self.sweep_interval.as_millis() as u64,
            "idle reaper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.manager.reap_idle_once();
                }
            }
        }

        debug!("idle reaper stopped");
    }
}
