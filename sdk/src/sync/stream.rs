//! UI-facing market stream.
//!
//! [`MarketStream`] owns the observer handles for one view, routes each
//! frame kind to its reducer, and reconciles over REST after a reconnect.
//! The notification list is also refreshed over REST on a fixed period.
//! Data received before a disconnect stays visible and is flagged stale
//! until the next update arrives.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::alerts::{fire, AlertSink};
use super::config::SyncConfig;
use super::order_book::{BookFeed, FlashedBook};
use super::prices::{PriceFeed, PriceState};
use super::subscriptions::SubscriptionManager;
use super::throttle::ThrottledFeed;
use super::timers::Liveness;
use crate::client::SnapshotClient;
use crate::error::SdkError;
use crate::types::{
    MarketData, MarketEvent, MarketPulse, Notification, OrderBookSnapshot, PortfolioUpdate,
    PriceUpdate,
};
use crate::ws::{ConnectionManager, Envelope, MessageKind, ObserverHandle};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadReceipt {
    notification_id: String,
}

/// Per-view live state fed by one [`ConnectionManager`].
pub struct MarketStream {
    config: SyncConfig,
    subscriptions: SubscriptionManager,
    snapshots: Option<SnapshotClient>,
    alerts: Option<Arc<dyn AlertSink>>,
    liveness: Liveness,
    prices: PriceFeed,
    books: BookFeed,
    notifications: ThrottledFeed<Notification>,
    events: ThrottledFeed<MarketEvent>,
    market_data: Mutex<HashMap<String, MarketData>>,
    portfolio: Mutex<VecDeque<PortfolioUpdate>>,
    pulse: watch::Sender<Option<MarketPulse>>,
    stale: AtomicBool,
    handles: Mutex<Vec<ObserverHandle>>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MarketStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketStream")
            .field("subscriptions", &self.subscriptions)
            .field("stale", &self.is_stale())
            .field("alive", &self.liveness.is_alive())
            .finish()
    }
}

/// Builder for [`MarketStream`].
#[derive(Default)]
pub struct MarketStreamBuilder {
    config: SyncConfig,
    snapshots: Option<SnapshotClient>,
    alerts: Option<Arc<dyn AlertSink>>,
}

impl MarketStreamBuilder {
    /// Sets the sync configuration.
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables REST reconciliation after reconnects and periodic
    /// notification refreshes.
    #[must_use]
    pub fn snapshots(mut self, client: SnapshotClient) -> Self {
        self.snapshots = Some(client);
        self
    }

    /// Fires `sink` for every incoming notification.
    #[must_use]
    pub fn alerts(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    /// Creates the stream and attaches it to `manager`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn attach(
        self,
        manager: &ConnectionManager,
        subscriptions: SubscriptionManager,
    ) -> Result<Arc<MarketStream>, SdkError> {
        self.config.validate()?;
        let liveness = Liveness::new();
        let device = self.config.device;
        let (pulse, _) = watch::channel(None);

        let stream = Arc::new(MarketStream {
            prices: PriceFeed::new(self.config.price_flash, liveness.clone()),
            books: BookFeed::new(self.config.book_flash, liveness.clone()),
            notifications: ThrottledFeed::new(
                &self.config.notifications,
                device,
                liveness.clone(),
            ),
            events: ThrottledFeed::new(&self.config.events, device, liveness.clone()),
            config: self.config,
            subscriptions,
            snapshots: self.snapshots,
            alerts: self.alerts,
            liveness,
            market_data: Mutex::new(HashMap::new()),
            portfolio: Mutex::new(VecDeque::new()),
            pulse,
            stale: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
            refresher: Mutex::new(None),
        });
        stream.register(manager);

        let refresh = stream.config.notifications.refresh_for(device);
        if let (Some(client), Some(every)) = (stream.snapshots.clone(), refresh) {
            if tokio::runtime::Handle::try_current().is_ok() {
                stream.spawn_refresh(every, move || {
                    let client = client.clone();
                    async move {
                        client
                            .get_notifications()
                            .await
                            .map(|page| page.notifications)
                    }
                });
            } else {
                warn!("no runtime; notification refresh disabled");
            }
        }
        Ok(stream)
    }
}

fn route<F>(stream: &Weak<MarketStream>, f: F) -> impl Fn(&Envelope) + Send + Sync + 'static
where
    F: Fn(&MarketStream, &Envelope) + Send + Sync + 'static,
{
    let stream = stream.clone();
    move |envelope| {
        if let Some(stream) = stream.upgrade() {
            if stream.liveness.is_alive() {
                f(&stream, envelope);
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Option<T> {
    envelope
        .payload()
        .inspect_err(|e| debug!(kind = ?envelope.kind, error = %e, "dropping malformed payload"))
        .ok()
}

impl MarketStream {
    /// Starts building a stream.
    #[must_use]
    pub fn builder() -> MarketStreamBuilder {
        MarketStreamBuilder::default()
    }

    fn register(self: &Arc<Self>, manager: &ConnectionManager) {
        let weak = Arc::downgrade(self);
        let mut handles = vec![
            manager.subscribe(
                MessageKind::PriceUpdate,
                route(&weak, |s, e| {
                    if let Some(update) = decode::<PriceUpdate>(e) {
                        s.fresh();
                        s.prices.apply(update);
                    }
                }),
            ),
            manager.subscribe(
                MessageKind::MarketData,
                route(&weak, |s, e| {
                    if let Some(data) = decode::<MarketData>(e) {
                        s.fresh();
                        s.market_data
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(data.asset_id.clone(), data);
                    }
                }),
            ),
            manager.subscribe(
                MessageKind::OrderBookUpdate,
                route(&weak, |s, e| {
                    if let Some(book) = decode::<OrderBookSnapshot>(e) {
                        s.fresh();
                        // Rejections are logged by the feed.
                        let _ = s.books.merge(book);
                    }
                }),
            ),
            manager.subscribe(
                MessageKind::MarketPulse,
                route(&weak, |s, e| {
                    if let Some(pulse) = decode::<MarketPulse>(e) {
                        s.fresh();
                        s.pulse.send_replace(Some(pulse));
                    }
                }),
            ),
            manager.subscribe(
                MessageKind::PortfolioUpdate,
                route(&weak, |s, e| {
                    if let Some(update) = decode::<PortfolioUpdate>(e) {
                        s.fresh();
                        let mut history =
                            s.portfolio.lock().unwrap_or_else(PoisonError::into_inner);
                        history.push_front(update);
                        history.truncate(s.config.portfolio_history);
                    }
                }),
            ),
            manager.subscribe(
                MessageKind::MarketEvent,
                route(&weak, |s, e| {
                    if let Some(event) = decode::<MarketEvent>(e) {
                        s.fresh();
                        s.events.push(event);
                    }
                }),
            ),
            manager.subscribe(
                MessageKind::Notification,
                route(&weak, |s, e| {
                    if let Some(notification) = decode::<Notification>(e) {
                        if let Some(ref sink) = s.alerts {
                            fire(sink.as_ref(), &notification);
                        }
                        s.notifications.push(notification);
                    }
                }),
            ),
            manager.subscribe(
                MessageKind::NotificationRead,
                route(&weak, |s, e| {
                    if let Some(receipt) = decode::<ReadReceipt>(e) {
                        s.notifications
                            .update(&receipt.notification_id, |n| n.read = true);
                    }
                }),
            ),
            manager.subscribe(
                MessageKind::AllNotificationsRead,
                route(&weak, |s, _| s.notifications.update_all(|n| n.read = true)),
            ),
        ];

        let on_disconnect = weak.clone();
        handles.push(manager.on_disconnect(move || {
            if let Some(stream) = on_disconnect.upgrade() {
                stream.stale.store(true, Ordering::Release);
            }
        }));

        let on_reconnect = weak;
        handles.push(manager.on_reconnect(move || {
            if let Some(stream) = on_reconnect.upgrade() {
                stream.spawn_reconcile();
            }
        }));

        *self.handles.lock().unwrap_or_else(PoisonError::into_inner) = handles;
    }

    fn fresh(&self) {
        self.stale.store(false, Ordering::Release);
    }

    fn spawn_reconcile(self: &Arc<Self>) {
        if self.snapshots.is_none() || !self.liveness.is_alive() {
            return;
        }
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(stream) = weak.upgrade() {
                stream.reconcile().await;
            }
        });
    }

    /// Replaces the notification snapshot with `fetch` every `every`, first
    /// one period from now, until the stream is disposed.
    fn spawn_refresh<F, Fut, E>(self: &Arc<Self>, every: Duration, fetch: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<Notification>, E>> + Send + 'static,
        E: Display + Send,
    {
        let weak = Arc::downgrade(self);
        let start = Instant::now() + every;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, every);
            loop {
                ticker.tick().await;
                if !weak.upgrade().is_some_and(|s| s.liveness.is_alive()) {
                    break;
                }
                let fetched = fetch().await;
                let Some(stream) = weak.upgrade() else {
                    break;
                };
                if !stream.liveness.is_alive() {
                    break;
                }
                match fetched {
                    Ok(notifications) => stream.notifications.set_snapshot(notifications),
                    Err(e) => warn!(error = %e, "notification refresh failed"),
                }
            }
        });
        let mut refresher = self.refresher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = refresher.replace(task) {
            previous.abort();
        }
    }

    /// Pulls current prices and notifications over REST.
    ///
    /// Failures are logged; live updates keep flowing regardless.
    pub async fn reconcile(&self) {
        let Some(ref client) = self.snapshots else {
            return;
        };

        match client.get_prices(&self.subscriptions.assets()).await {
            Ok(prices) if self.liveness.is_alive() => self.prices.reconcile(prices),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "price reconciliation failed"),
        }

        match client.get_notifications().await {
            Ok(page) if self.liveness.is_alive() => {
                self.notifications.set_snapshot(page.notifications);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "notification reconciliation failed"),
        }
    }

    /// Subscription manager driving this stream.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Returns true after a disconnect until the next update arrives.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Current price state for an asset.
    #[must_use]
    pub fn price(&self, asset_id: &str) -> Option<PriceState> {
        self.prices.get(asset_id)
    }

    /// All tracked prices.
    #[must_use]
    pub fn prices(&self) -> HashMap<String, PriceState> {
        self.prices.snapshot()
    }

    /// Observes price revisions.
    #[must_use]
    pub fn price_changes(&self) -> watch::Receiver<u64> {
        self.prices.changes()
    }

    /// Latest market summary for an asset.
    #[must_use]
    pub fn market_data(&self, asset_id: &str) -> Option<MarketData> {
        self.market_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset_id)
            .cloned()
    }

    /// Merged order book for an asset.
    #[must_use]
    pub fn order_book(&self, asset_id: &str) -> Option<FlashedBook> {
        self.books.get(asset_id)
    }

    /// Observes order book revisions.
    #[must_use]
    pub fn book_changes(&self) -> watch::Receiver<u64> {
        self.books.changes()
    }

    /// Latest market pulse.
    #[must_use]
    pub fn pulse(&self) -> Option<MarketPulse> {
        self.pulse.borrow().clone()
    }

    /// Recent portfolio updates, newest first.
    #[must_use]
    pub fn portfolio_updates(&self) -> Vec<PortfolioUpdate> {
        self.portfolio
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Throttled notification feed.
    #[must_use]
    pub fn notifications(&self) -> &ThrottledFeed<Notification> {
        &self.notifications
    }

    /// Throttled market event feed.
    #[must_use]
    pub fn events(&self) -> &ThrottledFeed<MarketEvent> {
        &self.events
    }

    /// Stops all handlers, cancels pending timers and unsubscribes.
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        if !self.liveness.revoke() {
            return;
        }
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.prices.cancel_timers();
        self.books.cancel_timers();
        if let Some(task) = self
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.notifications.cancel();
        self.events.cancel();
        self.subscriptions.deactivate();
        debug!("market stream disposed");
    }
}

impl Drop for MarketStream {
    fn drop(&mut self) {
        self.dispose();
    }
}
