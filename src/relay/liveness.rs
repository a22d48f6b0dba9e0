//! Ping/pong sweep over every relay connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::HostRegistry;

/// Default time between sweeps.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub pinged: usize,
    pub terminated: usize,
}

/// Terminates connections that did not answer the previous ping.
pub struct LivenessMonitor {
    registry: Arc<HostRegistry>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<HostRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// One pass: terminate silent connections, ping the rest.
    pub fn sweep(&self) -> SweepStats {
        let connections = match self.registry.connections() {
            Ok(connections) => connections,
            Err(e) => {
                warn!(error = %e, "liveness sweep skipped");
                return SweepStats::default();
            }
        };

        let mut stats = SweepStats::default();
        for conn in connections {
            if conn.take_alive() {
                conn.ping();
                stats.pinged += 1;
            } else {
                info!(conn = conn.id(), "no pong since last sweep, terminating connection");
                conn.terminate();
                stats.terminated += 1;
            }
        }
        debug!(pinged = stats.pinged, terminated = stats.terminated, "liveness sweep");
        stats
    }

    /// Run sweeps forever on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolFamily;
    use crate::relay::registry::Outbound;
    use crate::relay::types::RegisterHostRequest;

    #[tokio::test]
    async fn test_sweep_pings_then_terminates() {
        let registry = Arc::new(HostRegistry::new(ProtocolFamily::Interactive));
        registry
            .register(RegisterHostRequest {
                host_id: Some("h1".into()),
                username: "u".into(),
                password: "p".into(),
            })
            .unwrap();
        let session = registry.verify("h1", "u", "p").unwrap();
        let (host, mut host_rx) = registry.connection();
        registry.attach_host(&session, host.clone()).unwrap();

        let monitor = LivenessMonitor::new(Arc::clone(&registry), DEFAULT_INTERVAL);

        let stats = monitor.sweep();
        assert_eq!(stats, SweepStats { pinged: 1, terminated: 0 });
        assert_eq!(host_rx.try_recv().unwrap(), Outbound::Ping);

        // Pong arrives: still alive on the next sweep.
        host.mark_alive();
        assert_eq!(monitor.sweep().pinged, 1);

        // No pong this time.
        let stats = monitor.sweep();
        assert_eq!(stats.terminated, 1);
        tokio::time::timeout(Duration::from_secs(1), host.terminated())
            .await
            .expect("terminate was not signalled");
    }
}
