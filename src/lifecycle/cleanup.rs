//! Periodic eviction of stale security state.
//!
//! # Responsibilities
//! - Purge events older than the TTL from the event store
//! - Drop rate limit entries whose window has closed

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::observability::metrics;
use crate::security::SecurityMonitor;

pub struct CleanupTask {
    monitor: Arc<SecurityMonitor>,
    interval: Duration,
}

impl CleanupTask {
    pub fn new(monitor: Arc<SecurityMonitor>, interval: Duration) -> Self {
        Self { monitor, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Cleanup task starting");

        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cleanup task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One cleanup pass. Returns (events purged, entries swept).
    pub fn sweep(&self) -> (usize, usize) {
        let now = self.monitor.clock().now();
        let store = self.monitor.detector().store();

        let events = store.cleanup(now);
        let entries = self.monitor.limiter().sweep_expired(now);
        metrics::record_monitored_keys(store.len());

        if events > 0 || entries > 0 {
            tracing::debug!(events, entries, "Expired security state removed");
        }
        (events, entries)
    }
}
