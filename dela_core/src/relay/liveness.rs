//! Connection liveness monitor
//!
//! Every interval each connection is pinged. A connection that has not
//! answered the previous ping by the next tick is closed and its room torn
//! down, which tells the surviving peer with `peer-disconnected`.

use super::registry::{ConnectionId, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct LivenessMonitor {
    registry: Arc<Registry>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<Registry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run one probe round and return the reaped connections
    ///
    /// Probes are queued, never awaited, so a stalled peer cannot hold up
    /// the sweep.
    pub async fn sweep(&self) -> Vec<ConnectionId> {
        let dead = self.registry.probe_connections().await;
        for id in &dead {
            tracing::warn!("Terminating dead connection {}", id);
            self.registry.reap(*id).await;
        }
        dead
    }

    /// Sweep on every interval boundary until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Liveness monitor stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}
