//! Client subscription manager.
//!
//! Tracks the topic set a view wants, sends batched subscribe and
//! unsubscribe calls, and replays the whole set after every reconnect as a
//! single mixed-topic message. The
//! server treats subscribe as idempotent, so a replay never duplicates
//! membership.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, warn};

use crate::types::Topic;
use crate::ws::{ConnectionManager, ControlMessage, ObserverHandle, WsError};

/// Outbound side of the control channel.
pub trait ControlSink: Send + Sync {
    /// Sends one control message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be queued.
    fn send(&self, message: &ControlMessage) -> Result<(), WsError>;
}

impl ControlSink for ConnectionManager {
    fn send(&self, message: &ControlMessage) -> Result<(), WsError> {
        ConnectionManager::send(self, message)
    }
}

#[derive(Debug, Default, Clone)]
struct Desired {
    assets: BTreeSet<String>,
    portfolio: Option<String>,
    channels: BTreeSet<String>,
}

impl Desired {
    fn topics(&self) -> Vec<Topic> {
        self.assets
            .iter()
            .map(|id| Topic::asset(id.as_str()))
            .chain(self.portfolio.iter().map(|id| Topic::portfolio(id.as_str())))
            .chain(self.channels.iter().map(|c| Topic::channel(c.as_str())))
            .collect()
    }

    fn subscribe_message(&self) -> Option<ControlMessage> {
        let topics = self.topics();
        (!topics.is_empty()).then_some(ControlMessage::Subscribe { topics })
    }

    fn unsubscribe_message(&self) -> Option<ControlMessage> {
        let topics = self.topics();
        (!topics.is_empty()).then_some(ControlMessage::Unsubscribe { topics })
    }
}

struct Inner {
    sink: Arc<dyn ControlSink>,
    desired: Mutex<Desired>,
    active: Mutex<bool>,
    handles: Mutex<Vec<ObserverHandle>>,
}

/// Desired-topic tracker with reconnect replay.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("desired", &self.desired())
            .field("active", &self.is_active())
            .finish()
    }
}

impl SubscriptionManager {
    /// Creates an inactive manager sending through `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn ControlSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                desired: Mutex::new(Desired::default()),
                active: Mutex::new(false),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a manager bound to a connection and attached to its
    /// lifecycle.
    #[must_use]
    pub fn for_connection(manager: &ConnectionManager) -> Self {
        let subscriptions = Self::new(Arc::new(manager.clone()));
        subscriptions.attach(manager);
        subscriptions
    }

    /// Replays the desired set whenever `manager` connects or reconnects.
    ///
    /// Calling it again replaces the previous attachment.
    pub fn attach(&self, manager: &ConnectionManager) {
        let on_connect = Arc::downgrade(&self.inner);
        let on_reconnect = Arc::downgrade(&self.inner);
        let handles = vec![
            manager.on_connect(move || replay_weak(&on_connect)),
            manager.on_reconnect(move || replay_weak(&on_reconnect)),
        ];
        *self
            .inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handles;
    }

    /// Returns the desired topics.
    #[must_use]
    pub fn desired(&self) -> Vec<Topic> {
        self.inner
            .desired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .topics()
    }

    /// Returns the desired asset ids.
    #[must_use]
    pub fn assets(&self) -> Vec<String> {
        self.inner
            .desired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .assets
            .iter()
            .cloned()
            .collect()
    }

    /// Returns true between [`activate`](Self::activate) and
    /// [`deactivate`](Self::deactivate).
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self.inner.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts sending: subscribes to the whole desired set in one batch.
    ///
    /// A closed connection is not an error; the set is sent on connect.
    ///
    /// # Errors
    ///
    /// Returns an error if a message cannot be queued on an open connection.
    pub fn activate(&self) -> Result<(), WsError> {
        *self.inner.active.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.replay()
    }

    /// Re-sends the whole desired set.
    ///
    /// # Errors
    ///
    /// Returns an error if a message cannot be queued on an open connection.
    pub fn replay(&self) -> Result<(), WsError> {
        if !self.is_active() {
            return Ok(());
        }
        let message = self
            .inner
            .desired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe_message();
        debug!(
            topics = message.as_ref().map_or(0, |m| m.subscribe_topics().len()),
            "replaying subscriptions"
        );
        self.send_all(message.as_slice())
    }

    /// Unsubscribes from everything this manager added and stops sending.
    ///
    /// The desired set is kept so a later [`activate`](Self::activate)
    /// restores it.
    pub fn deactivate(&self) {
        let was_active = std::mem::replace(
            &mut *self.inner.active.lock().unwrap_or_else(PoisonError::into_inner),
            false,
        );
        if !was_active {
            return;
        }
        let message = self
            .inner
            .desired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unsubscribe_message();
        if let Err(e) = self.send_all(message.as_slice()) {
            debug!(error = %e, "unsubscribe on deactivate not delivered");
        }
    }

    /// Detaches from the connection lifecycle and deactivates.
    pub fn dispose(&self) {
        self.inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.deactivate();
    }

    /// Replaces the desired asset set, sending only the difference.
    ///
    /// # Errors
    ///
    /// Returns an error if a message cannot be queued on an open connection.
    pub fn set_assets<I, S>(&self, asset_ids: I) -> Result<(), WsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: BTreeSet<String> = asset_ids.into_iter().map(Into::into).collect();
        let mut messages = Vec::new();
        {
            let mut desired = self
                .inner
                .desired
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let added: Vec<String> = next.difference(&desired.assets).cloned().collect();
            messages.extend(desired.assets.difference(&next).map(|asset_id| {
                ControlMessage::UnsubscribeAsset {
                    asset_id: asset_id.clone(),
                }
            }));
            if !added.is_empty() {
                messages.push(ControlMessage::SubscribeAssets { asset_ids: added });
            }
            desired.assets = next;
        }
        self.send_if_active(&messages)
    }

    /// Sets or clears the desired portfolio.
    ///
    /// # Errors
    ///
    /// Returns an error if a message cannot be queued on an open connection.
    pub fn set_portfolio(&self, portfolio_id: Option<String>) -> Result<(), WsError> {
        let mut messages = Vec::new();
        {
            let mut desired = self
                .inner
                .desired
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if desired.portfolio == portfolio_id {
                return Ok(());
            }
            if let Some(old) = desired.portfolio.take() {
                messages.push(ControlMessage::UnsubscribePortfolio { portfolio_id: old });
            }
            if let Some(ref new) = portfolio_id {
                messages.push(ControlMessage::SubscribePortfolio {
                    portfolio_id: new.clone(),
                });
            }
            desired.portfolio = portfolio_id;
        }
        self.send_if_active(&messages)
    }

    /// Adds a named channel.
    ///
    /// # Errors
    ///
    /// Returns an error if a message cannot be queued on an open connection.
    pub fn add_channel(&self, channel: impl Into<String>) -> Result<(), WsError> {
        let channel = channel.into();
        let inserted = self
            .inner
            .desired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .channels
            .insert(channel.clone());
        if !inserted {
            return Ok(());
        }
        self.send_if_active(&[ControlMessage::SubscribeChannel { channel }])
    }

    /// Removes a named channel.
    ///
    /// # Errors
    ///
    /// Returns an error if a message cannot be queued on an open connection.
    pub fn remove_channel(&self, channel: &str) -> Result<(), WsError> {
        let removed = self
            .inner
            .desired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .channels
            .remove(channel);
        if !removed {
            return Ok(());
        }
        self.send_if_active(&[ControlMessage::UnsubscribeChannel {
            channel: channel.to_string(),
        }])
    }

    fn send_if_active(&self, messages: &[ControlMessage]) -> Result<(), WsError> {
        if !self.is_active() {
            return Ok(());
        }
        self.send_all(messages)
    }

    fn send_all(&self, messages: &[ControlMessage]) -> Result<(), WsError> {
        for message in messages {
            match self.inner.sink.send(message) {
                Ok(()) => {}
                // Replayed on the next connect.
                Err(WsError::NotConnected) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn replay_weak(inner: &Weak<Inner>) {
    if let Some(inner) = inner.upgrade() {
        let manager = SubscriptionManager { inner };
        if let Err(e) = manager.replay() {
            warn!(error = %e, "subscription replay failed");
        }
    }
}
