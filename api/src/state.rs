//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::notifications::NotificationBus;
use crate::publisher::MarketPublisher;
use crate::ws::{ConnectionRegistry, Dispatcher, SubscriptionIndex, WsMetrics};

/// State shared by every route and connection task.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Topic fan-out.
    pub dispatcher: Arc<Dispatcher>,
    /// User notification delivery.
    pub notifications: Arc<NotificationBus>,
    /// Counters.
    pub metrics: Arc<WsMetrics>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl AppState {
    /// Wires the registry, index, dispatcher and notification bus.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let metrics = Arc::new(WsMetrics::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(SubscriptionIndex::new())));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), Arc::clone(&metrics)));
        let notifications = Arc::new(NotificationBus::new(Arc::clone(&dispatcher)));
        Self {
            config: Arc::new(config),
            registry,
            dispatcher,
            notifications,
            metrics,
        }
    }

    /// Returns the subscription index.
    #[must_use]
    pub fn index(&self) -> &Arc<SubscriptionIndex> {
        self.registry.index()
    }

    /// Returns a publisher for producers.
    #[must_use]
    pub fn publisher(&self) -> MarketPublisher {
        MarketPublisher::new(Arc::clone(&self.dispatcher))
    }
}
