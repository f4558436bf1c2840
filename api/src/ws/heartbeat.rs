//! Heartbeat monitor.
//!
//! Each tick walks a snapshot of the registry. A connection that has not
//! answered since the previous tick is terminated and removed; every other
//! connection has its liveness flag cleared and is pinged. A silent
//! connection is therefore removed on the second tick after its last pong.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::close::CloseReason;
use super::connection::Connection;
use super::metrics::WsMetrics;
use super::registry::ConnectionRegistry;
use crate::error::StreamError;

/// Outcome of one heartbeat sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Connections examined.
    pub checked: usize,
    /// Pings queued.
    pub pinged: usize,
    /// Pings that could not be queued within the timeout.
    pub ping_failures: usize,
    /// Connections terminated for missing the previous ping.
    pub terminated: usize,
}

/// Periodic liveness check over the registry.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<WsMetrics>,
    interval: Duration,
    ping_timeout: Duration,
}

impl HeartbeatMonitor {
    /// Creates a monitor.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<WsMetrics>,
        interval: Duration,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            metrics,
            interval,
            ping_timeout,
        }
    }

    /// Returns the sweep period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one sweep.
    pub async fn tick(&self) -> HeartbeatReport {
        let snapshot = self.registry.snapshot().await;
        let mut report = HeartbeatReport {
            checked: snapshot.len(),
            ..Default::default()
        };

        let (live, dead): (Vec<Arc<Connection>>, Vec<Arc<Connection>>) =
            snapshot.into_iter().partition(|conn| conn.take_alive());

        for conn in dead {
            let timeout = StreamError::LivenessTimeout {
                connection_id: conn.id(),
            };
            warn!(identity = %conn.identity(), error = %timeout, "terminating silent connection");
            conn.terminate(CloseReason::GoingAway, "heartbeat timeout");
            self.registry.remove_connection(&conn).await;
            self.metrics.record_heartbeat_termination();
            report.terminated += 1;
        }

        // Pings run concurrently so one full queue cannot hold up the rest.
        let results = join_all(live.iter().map(|conn| conn.ping(self.ping_timeout))).await;
        for (conn, queued) in live.iter().zip(results) {
            if queued {
                report.pinged += 1;
            } else {
                debug!(connection_id = conn.id(), "heartbeat ping not queued");
                report.ping_failures += 1;
            }
        }

        report
    }

    /// Spawns the sweep loop. The first sweep runs one interval from now.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        // Anchored here, not on first poll, so scheduling delay cannot push
        // the first sweep back.
        let start = Instant::now() + self.interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = self.tick().await;
                if report.terminated > 0 || report.ping_failures > 0 {
                    debug!(?report, "heartbeat sweep");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::topics::SubscriptionIndex;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    const PERIOD: Duration = Duration::from_secs(30);

    fn monitor() -> (Arc<HeartbeatMonitor>, Arc<ConnectionRegistry>, Arc<WsMetrics>) {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(SubscriptionIndex::new())));
        let metrics = Arc::new(WsMetrics::new());
        let monitor = Arc::new(HeartbeatMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            PERIOD,
            Duration::from_millis(50),
        ));
        (monitor, registry, metrics)
    }

    async fn register(
        registry: &ConnectionRegistry,
        identity: &str,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(Connection::new(identity, tx));
        registry.register(Arc::clone(&conn)).await;
        (conn, rx)
    }

    #[tokio::test]
    async fn test_tick_pings_then_terminates_silent() {
        let (monitor, registry, metrics) = monitor();
        let (_conn, mut rx) = register(&registry, "alice", 8).await;

        let first = monitor.tick().await;
        assert_eq!(first.pinged, 1);
        assert_eq!(first.terminated, 0);
        assert!(matches!(rx.recv().await, Some(Message::Ping(_))));

        let second = monitor.tick().await;
        assert_eq!(second.terminated, 1);
        assert!(registry.is_empty().await);
        assert!(registry.index().is_empty().await);
        assert_eq!(metrics.heartbeat_terminations(), 1);
        assert!(matches!(rx.recv().await, Some(Message::Close(_))));
    }

    #[tokio::test]
    async fn test_pong_keeps_connection() {
        let (monitor, registry, _metrics) = monitor();
        let (conn, _rx) = register(&registry, "alice", 8).await;

        for _ in 0..5 {
            let report = monitor.tick().await;
            assert_eq!(report.terminated, 0);
            conn.mark_alive();
        }
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_others() {
        let (monitor, registry, _metrics) = monitor();
        let (stuck, _stuck_rx) = register(&registry, "stuck", 1).await;
        stuck
            .send_text(axum::extract::ws::Utf8Bytes::from_static("{}"))
            .expect("fill queue");
        let (_ok, mut ok_rx) = register(&registry, "ok", 8).await;

        let report = monitor.tick().await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.pinged, 1);
        assert_eq!(report.ping_failures, 1);
        assert!(matches!(ok_rx.recv().await, Some(Message::Ping(_))));
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_silent_connection_removed_within_two_intervals() {
        tokio::time::pause();
        let (monitor, registry, _metrics) = monitor();
        let (_conn, _rx) = register(&registry, "alice", 8).await;
        let handle = Arc::clone(&monitor).spawn();

        // Never earlier than the second sweep.
        tokio::time::advance(PERIOD + Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(registry.len().await, 1);

        tokio::time::advance(PERIOD).await;
        settle().await;
        assert!(registry.is_empty().await);

        handle.abort();
    }

    #[tokio::test]
    async fn test_first_sweep_anchored_at_spawn() {
        tokio::time::pause();
        let (monitor, registry, _metrics) = monitor();
        let (_conn, mut rx) = register(&registry, "alice", 8).await;

        // The task is not polled until well after spawn returns.
        let handle = Arc::clone(&monitor).spawn();
        tokio::time::advance(PERIOD / 2).await;
        tokio::time::advance(PERIOD / 2 + Duration::from_millis(1)).await;
        settle().await;
        assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));

        handle.abort();
    }
}
