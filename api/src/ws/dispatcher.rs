//! Topic fan-out.
//!
//! An envelope is serialized once and queued on every subscriber without
//! waiting. A subscriber whose queue is full or closed is terminated and
//! removed; the rest of the fan-out carries on and the producer only sees
//! the counts.

use std::sync::Arc;

use panelstream_sdk::{Envelope, Topic};
use tracing::warn;

use super::close::CloseReason;
use super::connection::Connection;
use super::messages::encode;
use super::metrics::WsMetrics;
use super::registry::ConnectionRegistry;
use crate::error::StreamError;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers resolved for the topic.
    pub subscribers: usize,
    /// Frames queued.
    pub delivered: usize,
    /// Subscribers dropped because their send failed.
    pub failed: usize,
}

/// Fans envelopes out to topic subscribers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<WsMetrics>,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<WsMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Delivers `envelope` to every current subscriber of `topic`.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the envelope cannot be encoded. Send
    /// failures are absorbed and reported in the returned counts.
    pub async fn dispatch(
        &self,
        topic: &Topic,
        envelope: &Envelope,
    ) -> Result<DispatchReport, StreamError> {
        let ids = self.registry.index().subscribers(topic).await;
        if ids.is_empty() {
            return Ok(DispatchReport::default());
        }

        let text = encode(envelope)?;
        let targets = self.registry.resolve(&ids).await;
        self.metrics.record_dispatch();

        let mut report = DispatchReport {
            subscribers: targets.len(),
            ..Default::default()
        };
        let mut failed = Vec::new();
        for conn in targets {
            match conn.send_text(text.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(topic = %topic, identity = %conn.identity(), error = %e, "dispatch failed");
                    failed.push(conn);
                }
            }
        }

        report.failed = failed.len();
        for conn in failed {
            self.drop_connection(&conn).await;
        }
        Ok(report)
    }

    /// Delivers `envelope` to every registered connection.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the envelope cannot be encoded.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<DispatchReport, StreamError> {
        self.dispatch(&Topic::Broadcast, envelope).await
    }

    /// Delivers `envelope` to the connection for `identity`, if any.
    ///
    /// Returns false if the identity is not connected or its send failed.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the envelope cannot be encoded.
    pub async fn send_to_identity(
        &self,
        identity: &str,
        envelope: &Envelope,
    ) -> Result<bool, StreamError> {
        let Some(conn) = self.registry.get(identity).await else {
            return Ok(false);
        };
        let text = encode(envelope)?;
        match conn.send_text(text) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(identity = %identity, error = %e, "direct send failed");
                self.drop_connection(&conn).await;
                Ok(false)
            }
        }
    }

    async fn drop_connection(&self, conn: &Connection) {
        self.metrics.record_dispatch_failure();
        conn.terminate(CloseReason::GoingAway, "send failed");
        self.registry.remove_connection(conn).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::topics::SubscriptionIndex;
    use axum::extract::ws::Message;
    use panelstream_sdk::{MessageKind, PriceUpdate};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<WsMetrics>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(SubscriptionIndex::new())));
        let metrics = Arc::new(WsMetrics::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&metrics));
        Fixture {
            registry,
            metrics,
            dispatcher,
        }
    }

    async fn join(
        fx: &Fixture,
        identity: &str,
        capacity: usize,
        topics: &[Topic],
    ) -> (Arc<Connection>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(Connection::new(identity, tx));
        fx.registry.register(Arc::clone(&conn)).await;
        for topic in topics {
            fx.registry
                .subscribe(&conn, topic.clone())
                .await
                .expect("subscribe");
        }
        (conn, rx)
    }

    fn price() -> Envelope {
        Envelope::with_payload(
            MessageKind::PriceUpdate,
            &PriceUpdate::new("spider-1", "ASM300", dec!(10)),
        )
        .expect("envelope")
        .for_asset("spider-1")
    }

    #[tokio::test]
    async fn test_dispatch_reaches_only_subscribers() {
        let fx = fixture();
        let topic = Topic::asset("spider-1");
        let (_a, mut rx_a) = join(&fx, "alice", 8, &[topic.clone()]).await;
        let (_b, mut rx_b) = join(&fx, "bob", 8, &[Topic::asset("bat-1")]).await;

        let report = fx.dispatcher.dispatch(&topic, &price()).await.expect("dispatch");
        assert_eq!(report.subscribers, 1);
        assert_eq!(report.delivered, 1);

        assert!(matches!(rx_a.try_recv(), Ok(Message::Text(_))));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_no_subscribers() {
        let fx = fixture();
        let report = fx
            .dispatcher
            .dispatch(&Topic::asset("nobody"), &price())
            .await
            .expect("dispatch");
        assert_eq!(report, DispatchReport::default());
        assert_eq!(fx.metrics.dispatches(), 0);
    }

    #[tokio::test]
    async fn test_failed_send_is_isolated() {
        let fx = fixture();
        let topic = Topic::asset("spider-1");
        let (slow, _slow_rx) = join(&fx, "slow", 1, &[topic.clone()]).await;
        slow.send_text(axum::extract::ws::Utf8Bytes::from_static("{}"))
            .expect("fill queue");
        let (_fast, mut fast_rx) = join(&fx, "fast", 8, &[topic.clone()]).await;

        let report = fx.dispatcher.dispatch(&topic, &price()).await.expect("dispatch");
        assert_eq!(report.subscribers, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);

        assert!(matches!(fast_rx.try_recv(), Ok(Message::Text(_))));
        assert!(fx.registry.get("slow").await.is_none());
        assert!(slow.is_closed());
        assert_eq!(fx.registry.index().subscriber_count(&topic).await, 1);
        assert_eq!(fx.metrics.dispatch_failures(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let fx = fixture();
        let (_a, mut rx_a) = join(&fx, "alice", 8, &[]).await;
        let (_b, mut rx_b) = join(&fx, "bob", 8, &[]).await;

        let report = fx
            .dispatcher
            .broadcast(&Envelope::pong())
            .await
            .expect("broadcast");
        assert_eq!(report.delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_send_to_identity() {
        let fx = fixture();
        let (_a, mut rx_a) = join(&fx, "alice", 8, &[]).await;

        assert!(fx
            .dispatcher
            .send_to_identity("alice", &Envelope::pong())
            .await
            .expect("send"));
        assert!(!fx
            .dispatcher
            .send_to_identity("nobody", &Envelope::pong())
            .await
            .expect("send"));
        assert!(rx_a.try_recv().is_ok());
    }
}
