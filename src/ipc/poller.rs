// src/ipc/poller.rs
//! Cooperative IPC polling loop
//!
//! A single task ticks every `IPC_POLL_INTERVAL` and asks the lifecycle
//! manager to check each running session for its next response artifact.
//! A tick that finds nothing returns immediately; no per-session work may
//! block the tick, so one stalled session never delays delivery to others.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::runtime::lifecycle::LifecycleManager;
use crate::utils::config::IPC_POLL_INTERVAL;

/// Timer-driven response delivery for all running sessions
pub struct IpcPoller {
    manager: Arc<LifecycleManager>,
    interval: Duration,
}

impl IpcPoller {
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self {
            manager,
            interval: IPC_POLL_INTERVAL,
        }
    }

    /// Run until the shutdown token fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(interval_ms = self.interval.as_millis() as u64, "IPC poller started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.manager.poll_ipc_once();
                }
            }
        }

        debug!("IPC poller stopped");
    }
}
