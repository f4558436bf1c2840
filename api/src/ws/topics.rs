//! Subscription index.
//!
//! Bidirectional topic/connection membership table. Both directions live
//! under one lock so they can never disagree.

use std::collections::{HashMap, HashSet};

use panelstream_sdk::Topic;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    by_topic: HashMap<Topic, HashSet<u64>>,
    by_connection: HashMap<u64, HashSet<Topic>>,
}

/// Manages topic subscriptions for all connections.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    tables: RwLock<Tables>,
}

impl SubscriptionIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a connection to a topic.
    ///
    /// Returns false if the edge already existed.
    pub async fn subscribe(&self, connection_id: u64, topic: Topic) -> bool {
        let mut tables = self.tables.write().await;
        let added = tables
            .by_connection
            .entry(connection_id)
            .or_default()
            .insert(topic.clone());
        if added {
            tables.by_topic.entry(topic).or_default().insert(connection_id);
        }
        added
    }

    /// Unsubscribes a connection from a topic.
    ///
    /// Returns false if the edge did not exist.
    pub async fn unsubscribe(&self, connection_id: u64, topic: &Topic) -> bool {
        let mut tables = self.tables.write().await;
        let removed = match tables.by_connection.get_mut(&connection_id) {
            Some(topics) => {
                let removed = topics.remove(topic);
                if topics.is_empty() {
                    tables.by_connection.remove(&connection_id);
                }
                removed
            }
            None => false,
        };
        if removed {
            if let Some(connections) = tables.by_topic.get_mut(topic) {
                connections.remove(&connection_id);
                if connections.is_empty() {
                    tables.by_topic.remove(topic);
                }
            }
        }
        removed
    }

    /// Unsubscribes a connection from every topic.
    ///
    /// Returns the number of edges removed.
    pub async fn unsubscribe_all(&self, connection_id: u64) -> usize {
        let mut tables = self.tables.write().await;
        let Some(topics) = tables.by_connection.remove(&connection_id) else {
            return 0;
        };
        for topic in &topics {
            if let Some(connections) = tables.by_topic.get_mut(topic) {
                connections.remove(&connection_id);
                if connections.is_empty() {
                    tables.by_topic.remove(topic);
                }
            }
        }
        topics.len()
    }

    /// Returns the connection IDs subscribed to a topic.
    pub async fn subscribers(&self, topic: &Topic) -> Vec<u64> {
        let tables = self.tables.read().await;
        tables
            .by_topic
            .get(topic)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the topics a connection is subscribed to.
    pub async fn topics_of(&self, connection_id: u64) -> Vec<Topic> {
        let tables = self.tables.read().await;
        tables
            .by_connection
            .get(&connection_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if the edge exists.
    pub async fn is_subscribed(&self, connection_id: u64, topic: &Topic) -> bool {
        let tables = self.tables.read().await;
        tables
            .by_connection
            .get(&connection_id)
            .is_some_and(|s| s.contains(topic))
    }

    /// Returns the number of subscribers for a topic.
    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        let tables = self.tables.read().await;
        tables.by_topic.get(topic).map_or(0, HashSet::len)
    }

    /// Returns the number of topics with at least one subscriber.
    pub async fn topic_count(&self) -> usize {
        self.tables.read().await.by_topic.len()
    }

    /// Returns the total number of subscriptions.
    pub async fn total_subscriptions(&self) -> usize {
        let tables = self.tables.read().await;
        tables.by_topic.values().map(HashSet::len).sum()
    }

    /// Returns true if there are no subscriptions in either direction.
    pub async fn is_empty(&self) -> bool {
        let tables = self.tables.read().await;
        tables.by_topic.is_empty() && tables.by_connection.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_index_subscribe() {
        let index = SubscriptionIndex::new();
        let topic = Topic::asset("spider-1");

        assert!(index.subscribe(1, topic.clone()).await);
        assert!(index.subscribe(2, topic.clone()).await);

        let subs = index.subscribers(&topic).await;
        assert_eq!(subs.len(), 2);
        assert!(subs.contains(&1));
        assert!(subs.contains(&2));
        assert_eq!(index.topics_of(1).await, vec![topic]);
    }

    #[tokio::test]
    async fn test_index_subscribe_idempotent() {
        let index = SubscriptionIndex::new();
        let topic = Topic::asset("spider-1");

        assert!(index.subscribe(1, topic.clone()).await);
        assert!(!index.subscribe(1, topic.clone()).await);
        assert_eq!(index.subscriber_count(&topic).await, 1);
        assert_eq!(index.total_subscriptions().await, 1);
    }

    #[tokio::test]
    async fn test_index_unsubscribe() {
        let index = SubscriptionIndex::new();
        let topic = Topic::asset("spider-1");

        index.subscribe(1, topic.clone()).await;
        index.subscribe(2, topic.clone()).await;
        assert!(index.unsubscribe(1, &topic).await);
        assert!(!index.unsubscribe(1, &topic).await);

        let subs = index.subscribers(&topic).await;
        assert_eq!(subs, vec![2]);
        assert!(index.topics_of(1).await.is_empty());
    }

    #[tokio::test]
    async fn test_index_unsubscribe_all() {
        let index = SubscriptionIndex::new();
        let asset = Topic::asset("spider-1");
        let portfolio = Topic::portfolio("p1");

        index.subscribe(1, asset.clone()).await;
        index.subscribe(1, portfolio.clone()).await;
        index.subscribe(1, Topic::Broadcast).await;
        index.subscribe(2, asset.clone()).await;

        assert_eq!(index.unsubscribe_all(1).await, 3);
        assert_eq!(index.subscriber_count(&asset).await, 1);
        assert_eq!(index.subscriber_count(&portfolio).await, 0);
        assert_eq!(index.topic_count().await, 1);
        assert_eq!(index.unsubscribe_all(1).await, 0);
    }

    #[tokio::test]
    async fn test_index_cycles_leave_nothing_behind() {
        let index = SubscriptionIndex::new();
        for round in 0..10u64 {
            for conn in 0..5u64 {
                index.subscribe(conn, Topic::Broadcast).await;
                index.subscribe(conn, Topic::asset(format!("a{}", round))).await;
                index.subscribe(conn, Topic::channel("victims")).await;
            }
            for conn in 0..5u64 {
                index.unsubscribe(conn, &Topic::channel("victims")).await;
                index.unsubscribe_all(conn).await;
            }
        }
        assert!(index.is_empty().await);
        assert_eq!(index.total_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn test_index_total_subscriptions() {
        let index = SubscriptionIndex::new();
        index.subscribe(1, Topic::asset("a")).await;
        index.subscribe(2, Topic::asset("a")).await;
        index.subscribe(1, Topic::asset("b")).await;

        assert_eq!(index.total_subscriptions().await, 3);
        assert!(index.is_subscribed(1, &Topic::asset("b")).await);
        assert!(!index.is_subscribed(2, &Topic::asset("b")).await);
    }
}
