//! Notification bus.
//!
//! Delivers user notifications to the identity's live connection and keeps
//! in-memory read receipts. Persistence belongs to the REST side; the bus
//! only needs enough state to answer whether a notification has been read
//! while the identity is connected. Receipts are capped per identity and
//! dropped when the identity's last connection closes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use panelstream_sdk::{Envelope, MessageKind, Notification};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StreamError;
use crate::ws::Dispatcher;

/// Individual read receipts kept per identity; the oldest are evicted first.
pub const MAX_RECEIPTS_PER_IDENTITY: usize = 256;

#[derive(Debug, Default)]
struct Receipts {
    read: HashSet<String>,
    order: VecDeque<String>,
    all_read_at: Option<DateTime<Utc>>,
}

impl Receipts {
    fn insert(&mut self, notification_id: &str) {
        if !self.read.insert(notification_id.to_string()) {
            return;
        }
        self.order.push_back(notification_id.to_string());
        while self.order.len() > MAX_RECEIPTS_PER_IDENTITY {
            if let Some(evicted) = self.order.pop_front() {
                self.read.remove(&evicted);
            }
        }
    }

    fn clear(&mut self) {
        self.read.clear();
        self.order.clear();
    }
}

/// Pushes notifications and read receipts to connected users.
#[derive(Debug)]
pub struct NotificationBus {
    dispatcher: Arc<Dispatcher>,
    receipts: RwLock<HashMap<String, Receipts>>,
}

impl NotificationBus {
    /// Creates a bus delivering through `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            receipts: RwLock::new(HashMap::new()),
        }
    }

    /// Sends a notification to `identity`.
    ///
    /// Returns false if the user is not connected. Missed notifications are
    /// picked up through the REST snapshot after reconnecting.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the notification cannot be encoded.
    pub async fn notify(
        &self,
        identity: &str,
        notification: &Notification,
    ) -> Result<bool, StreamError> {
        let envelope = Envelope::with_payload(MessageKind::Notification, notification)?;
        let delivered = self.dispatcher.send_to_identity(identity, &envelope).await?;
        debug!(identity = %identity, id = %notification.id, delivered, "notification");
        Ok(delivered)
    }

    /// Records that `identity` has read one notification and echoes the
    /// receipt to its connection.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the receipt cannot be encoded.
    pub async fn mark_read(&self, identity: &str, notification_id: &str) -> Result<bool, StreamError> {
        self.receipts
            .write()
            .await
            .entry(identity.to_string())
            .or_default()
            .insert(notification_id);

        let envelope = Envelope::new(
            MessageKind::NotificationRead,
            json!({ "notificationId": notification_id }),
        );
        self.dispatcher.send_to_identity(identity, &envelope).await
    }

    /// Marks everything `identity` has received so far as read.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the receipt cannot be encoded.
    pub async fn mark_all_read(&self, identity: &str) -> Result<bool, StreamError> {
        let now = Utc::now();
        {
            let mut receipts = self.receipts.write().await;
            let entry = receipts.entry(identity.to_string()).or_default();
            entry.clear();
            entry.all_read_at = Some(now);
        }

        let envelope = Envelope::new(
            MessageKind::AllNotificationsRead,
            json!({ "readAt": now }),
        );
        self.dispatcher.send_to_identity(identity, &envelope).await
    }

    /// Returns true if `identity` has read `notification`.
    pub async fn is_read(&self, identity: &str, notification: &Notification) -> bool {
        let receipts = self.receipts.read().await;
        receipts.get(identity).is_some_and(|r| {
            r.read.contains(&notification.id)
                || r.all_read_at.is_some_and(|at| notification.created_at <= at)
        })
    }

    /// Drops every receipt held for `identity`.
    pub async fn forget(&self, identity: &str) {
        if self.receipts.write().await.remove(identity).is_some() {
            debug!(identity = %identity, "read receipts dropped");
        }
    }

    /// Number of individual receipts held for `identity`.
    pub async fn receipt_count(&self, identity: &str) -> usize {
        self.receipts
            .read()
            .await
            .get(identity)
            .map_or(0, |r| r.read.len())
    }

    /// Number of identities with receipt state.
    pub async fn tracked_identities(&self) -> usize {
        self.receipts.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::{Connection, ConnectionRegistry, SubscriptionIndex, WsMetrics};
    use axum::extract::ws::Message;
    use chrono::Duration;
    use panelstream_sdk::NotificationKind;
    use tokio::sync::mpsc;

    async fn bus_with(identity: &str) -> (NotificationBus, mpsc::Receiver<Message>) {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(SubscriptionIndex::new())));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::new(WsMetrics::new()),
        ));
        let (tx, rx) = mpsc::channel(8);
        registry.register(Arc::new(Connection::new(identity, tx))).await;
        (NotificationBus::new(dispatcher), rx)
    }

    fn envelope(msg: Option<Message>) -> Envelope {
        match msg {
            Some(Message::Text(text)) => serde_json::from_str(text.as_str()).expect("envelope"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    fn note(id: &str) -> Notification {
        Notification::new(id, "alice", NotificationKind::Order, "Filled", "done")
    }

    #[tokio::test]
    async fn test_notify_delivers_to_identity() {
        let (bus, mut rx) = bus_with("alice").await;

        assert!(bus.notify("alice", &note("n1")).await.expect("notify"));
        assert!(!bus.notify("bob", &note("n2")).await.expect("notify"));

        let frame = envelope(rx.recv().await);
        assert_eq!(frame.kind, MessageKind::Notification);
        let delivered: Notification = frame.payload().expect("payload");
        assert_eq!(delivered.id, "n1");
    }

    #[tokio::test]
    async fn test_mark_read() {
        let (bus, mut rx) = bus_with("alice").await;
        let n1 = note("n1");

        assert!(!bus.is_read("alice", &n1).await);
        assert!(bus.mark_read("alice", "n1").await.expect("mark"));
        assert!(bus.is_read("alice", &n1).await);
        assert!(!bus.is_read("bob", &n1).await);

        let frame = envelope(rx.recv().await);
        assert_eq!(frame.kind, MessageKind::NotificationRead);
        assert_eq!(frame.data["notificationId"], "n1");
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let (bus, mut rx) = bus_with("alice").await;
        let old = note("n1").at(Utc::now() - Duration::minutes(5));

        assert!(bus.mark_all_read("alice").await.expect("mark"));
        assert!(bus.is_read("alice", &old).await);

        let later = note("n2").at(Utc::now() + Duration::minutes(5));
        assert!(!bus.is_read("alice", &later).await);

        let frame = envelope(rx.recv().await);
        assert_eq!(frame.kind, MessageKind::AllNotificationsRead);
    }

    #[tokio::test]
    async fn test_receipts_are_bounded_per_identity() {
        let (bus, _rx) = bus_with("alice").await;
        let total = MAX_RECEIPTS_PER_IDENTITY + 100;
        for i in 0..total {
            bus.mark_read("alice", &format!("n{}", i)).await.expect("mark");
        }
        bus.mark_read("alice", "n0").await.expect("mark");

        assert_eq!(bus.receipt_count("alice").await, MAX_RECEIPTS_PER_IDENTITY);
        assert!(!bus.is_read("alice", &note("n1")).await);
        assert!(bus.is_read("alice", &note(&format!("n{}", total - 1))).await);

        bus.forget("alice").await;
        assert_eq!(bus.receipt_count("alice").await, 0);
        assert_eq!(bus.tracked_identities().await, 0);
    }
}
