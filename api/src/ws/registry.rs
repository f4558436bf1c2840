//! Connection registry.
//!
//! The authoritative map of live connections, keyed by identity. Each
//! identity holds at most one connection; a new handshake supersedes the
//! previous one.
//!
//! Lock order is always registry, then index. Subscriptions are added while
//! holding the registry read lock, and removal holds the write lock while it
//! cascades into the index, so a concurrent subscribe can never leave an
//! entry behind for a connection that has already been removed.

use std::collections::HashMap;
use std::sync::Arc;

use panelstream_sdk::Topic;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::close::CloseReason;
use super::connection::Connection;
use super::topics::SubscriptionIndex;
use crate::error::StreamError;

#[derive(Debug, Default)]
struct Entries {
    by_identity: HashMap<String, Arc<Connection>>,
    by_id: HashMap<u64, Arc<Connection>>,
}

impl Entries {
    fn detach(&mut self, identity: &str) -> Option<Arc<Connection>> {
        let conn = self.by_identity.remove(identity)?;
        self.by_id.remove(&conn.id());
        Some(conn)
    }
}

/// Registry of live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    entries: RwLock<Entries>,
    index: Arc<SubscriptionIndex>,
}

impl ConnectionRegistry {
    /// Creates an empty registry that cascades removals into `index`.
    #[must_use]
    pub fn new(index: Arc<SubscriptionIndex>) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            index,
        }
    }

    /// Returns the subscription index.
    #[must_use]
    pub fn index(&self) -> &Arc<SubscriptionIndex> {
        &self.index
    }

    /// Registers a connection and joins it to the broadcast topic.
    ///
    /// Returns the connection it superseded, already removed from the index.
    /// The caller is responsible for closing it.
    pub async fn register(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let mut entries = self.entries.write().await;
        let previous = entries.detach(conn.identity());
        if let Some(ref prev) = previous {
            self.index.unsubscribe_all(prev.id()).await;
        }

        conn.mark_alive();
        self.index.subscribe(conn.id(), Topic::Broadcast).await;
        entries.by_id.insert(conn.id(), Arc::clone(&conn));
        entries
            .by_identity
            .insert(conn.identity().to_string(), Arc::clone(&conn));

        debug!(
            connection_id = conn.id(),
            identity = %conn.identity(),
            superseded = previous.as_ref().map(|p| p.id()),
            "connection registered"
        );
        previous
    }

    /// Returns the connection for an identity.
    pub async fn get(&self, identity: &str) -> Option<Arc<Connection>> {
        self.entries.read().await.by_identity.get(identity).cloned()
    }

    /// Returns the connection with an ID.
    pub async fn get_by_id(&self, connection_id: u64) -> Option<Arc<Connection>> {
        self.entries.read().await.by_id.get(&connection_id).cloned()
    }

    /// Resolves many connection IDs under one lock, skipping unknown ones.
    pub async fn resolve(&self, ids: &[u64]) -> Vec<Arc<Connection>> {
        let entries = self.entries.read().await;
        ids.iter()
            .filter_map(|id| entries.by_id.get(id).cloned())
            .collect()
    }

    /// Removes the connection for an identity and all of its subscriptions.
    pub async fn remove(&self, identity: &str) -> Option<Arc<Connection>> {
        let mut entries = self.entries.write().await;
        let conn = entries.detach(identity)?;
        self.index.unsubscribe_all(conn.id()).await;
        Some(conn)
    }

    /// Removes `conn` only if it is still the registered connection for its
    /// identity. Its subscriptions are dropped either way.
    ///
    /// Returns true if it was registered.
    pub async fn remove_connection(&self, conn: &Connection) -> bool {
        let mut entries = self.entries.write().await;
        let current = entries
            .by_identity
            .get(conn.identity())
            .is_some_and(|c| c.id() == conn.id());
        if current {
            entries.detach(conn.identity());
        }
        self.index.unsubscribe_all(conn.id()).await;
        current
    }

    /// Subscribes a registered connection to a topic.
    ///
    /// Returns false if the subscription already existed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConnection` if the connection has been removed.
    pub async fn subscribe(&self, conn: &Connection, topic: Topic) -> Result<bool, StreamError> {
        let entries = self.entries.read().await;
        if !entries.by_id.contains_key(&conn.id()) {
            return Err(StreamError::UnknownConnection(conn.id()));
        }
        Ok(self.index.subscribe(conn.id(), topic).await)
    }

    /// Unsubscribes a connection from a topic.
    pub async fn unsubscribe(&self, conn: &Connection, topic: &Topic) -> bool {
        self.index.unsubscribe(conn.id(), topic).await
    }

    /// Returns every live connection.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.entries.read().await.by_id.values().cloned().collect()
    }

    /// Calls `f` for every live connection.
    ///
    /// Iterates a snapshot, so `f` may call back into the registry.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        for conn in self.snapshot().await {
            f(&conn);
        }
    }

    /// Closes and removes every connection.
    ///
    /// Returns the number of connections closed.
    pub async fn close_all(&self, reason: CloseReason, text: &str) -> usize {
        let drained: Vec<Arc<Connection>> = {
            let mut entries = self.entries.write().await;
            entries.by_identity.clear();
            entries.by_id.drain().map(|(_, conn)| conn).collect()
        };
        for conn in &drained {
            self.index.unsubscribe_all(conn.id()).await;
            conn.terminate(reason, text);
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "closed all connections");
        }
        drained.len()
    }

    /// Returns the number of live connections.
    pub async fn len(&self) -> usize {
        self.entries.read().await.by_id.len()
    }

    /// Returns true if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.by_id.is_empty()
    }
}
