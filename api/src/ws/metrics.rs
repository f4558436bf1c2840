//! WebSocket metrics tracking.
//!
//! Provides atomic counters for monitoring connections, fan-out and
//! heartbeat activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Declares the monotonic counters: a field, a recorder and a getter each.
macro_rules! counters {
    ($( $(#[$doc:meta])* $field:ident => $vis:vis $record:ident; )*) => {
        #[derive(Debug, Default)]
        struct Counters {
            $( $field: AtomicU64, )*
        }

        impl WsMetrics {
            $(
                $(#[$doc])*
                $vis fn $record(&self) {
                    self.counters.$field.fetch_add(1, Ordering::Relaxed);
                }

                #[doc = concat!("Current `", stringify!($field), "` count.")]
                #[must_use]
                pub fn $field(&self) -> u64 {
                    self.counters.$field.load(Ordering::Relaxed)
                }
            )*
        }
    };
}

counters! {
    /// Records an accepted handshake.
    connections_opened => pub record_connection_opened;
    /// Records a connection torn down.
    connections_closed => pub record_connection_closed;
    /// Records a handshake rejected for a missing identity.
    auth_rejections => pub record_auth_rejection;
    /// Records a connection replaced by a newer one for the same identity.
    superseded => pub record_superseded;
    /// Records an inbound frame.
    messages_received => pub record_message_received;
    /// Records a frame written to a socket.
    messages_sent => pub record_message_sent;
    /// Records a protocol or transport error.
    errors => pub record_error;
    /// Records a topic added to a connection.
    subscriptions => pub record_subscription;
    /// Records a topic removed from a connection.
    unsubscriptions => pub record_unsubscription;
    /// Records one envelope fanned out to a topic.
    dispatches => pub record_dispatch;
    dispatch_failures => count_dispatch_failure;
    /// Records a connection dropped for missing a heartbeat.
    heartbeat_terminations => pub record_heartbeat_termination;
}

/// Process-wide counters for the streaming server.
///
/// Counters only grow; gauges such as active connections are derived.
#[derive(Debug)]
pub struct WsMetrics {
    counters: Counters,
    started: Instant,
}

impl Default for WsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WsMetrics {
    /// Creates zeroed counters starting the uptime clock now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            started: Instant::now(),
        }
    }

    /// Records a per-connection send that failed during fan-out. Also
    /// counts as an error.
    pub fn record_dispatch_failure(&self) {
        self.count_dispatch_failure();
        self.record_error();
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.connections_opened()
            .saturating_sub(self.connections_closed())
    }

    /// Time since the counters were created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average inbound plus outbound frame rate since start.
    #[must_use]
    pub fn messages_per_second(&self) -> f64 {
        let secs = self.uptime().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.messages_received().saturating_add(self.messages_sent()) as f64 / secs
    }

    /// Reads every counter into a serializable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> WsMetricsSnapshot {
        WsMetricsSnapshot {
            connections_opened: self.connections_opened(),
            connections_closed: self.connections_closed(),
            active_connections: self.active_connections(),
            auth_rejections: self.auth_rejections(),
            superseded: self.superseded(),
            messages_received: self.messages_received(),
            messages_sent: self.messages_sent(),
            errors: self.errors(),
            subscriptions: self.subscriptions(),
            unsubscriptions: self.unsubscriptions(),
            dispatches: self.dispatches(),
            dispatch_failures: self.dispatch_failures(),
            heartbeat_terminations: self.heartbeat_terminations(),
            uptime_secs: self.uptime().as_secs(),
            messages_per_second: self.messages_per_second(),
        }
    }
}

/// Counter values served by `/stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct WsMetricsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub active_connections: u64,
    pub auth_rejections: u64,
    pub superseded: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub errors: u64,
    pub subscriptions: u64,
    pub unsubscriptions: u64,
    pub dispatches: u64,
    pub dispatch_failures: u64,
    pub heartbeat_terminations: u64,
    pub uptime_secs: u64,
    pub messages_per_second: f64,
}
