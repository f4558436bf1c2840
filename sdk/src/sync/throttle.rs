//! Update throttler for high-volume feeds.
//!
//! Pushed items land in a bounded ring of the most recent N. A flush merges
//! that ring with the last polled snapshot, de-duplicates by id (pushed
//! items win), sorts newest first and truncates to the display limit. The
//! async [`ThrottledFeed`] flushes at most once per window.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::config::{DeviceProfile, ThrottleConfig};
use super::timers::Liveness;
use crate::types::{MarketEvent, Notification};

/// An item that can be de-duplicated and ordered in a throttled feed.
pub trait FeedItem: Clone + Send + Sync + 'static {
    /// Unique id.
    fn id(&self) -> &str;
    /// Ordering timestamp.
    fn timestamp(&self) -> DateTime<Utc>;
}

impl FeedItem for Notification {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl FeedItem for MarketEvent {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Pure throttling buffer.
#[derive(Debug, Clone)]
pub struct UpdateThrottler<T> {
    recent: VecDeque<T>,
    snapshot: Vec<T>,
    capacity: usize,
    display_limit: usize,
    pending: bool,
}

impl<T: FeedItem> UpdateThrottler<T> {
    /// Creates a throttler keeping `capacity` pushed items and showing at
    /// most `display_limit`.
    #[must_use]
    pub fn new(capacity: usize, display_limit: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(capacity),
            snapshot: Vec::new(),
            capacity: capacity.max(1),
            display_limit,
            pending: false,
        }
    }

    /// Buffers an item, evicting the oldest past capacity.
    ///
    /// Returns true if this is the first change since the last flush, in
    /// which case the caller should schedule one.
    pub fn push(&mut self, item: T) -> bool {
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(item);
        self.mark_pending()
    }

    /// Replaces the polled authoritative snapshot.
    pub fn set_snapshot(&mut self, items: Vec<T>) -> bool {
        self.snapshot = items;
        self.mark_pending()
    }

    /// Applies `f` to every copy of the item with `id`.
    pub fn update<F: FnMut(&mut T)>(&mut self, id: &str, mut f: F) -> bool {
        let mut found = false;
        for item in self
            .recent
            .iter_mut()
            .chain(self.snapshot.iter_mut())
            .filter(|item| item.id() == id)
        {
            f(item);
            found = true;
        }
        found && self.mark_pending()
    }

    /// Applies `f` to every buffered and snapshot item.
    pub fn update_all<F: FnMut(&mut T)>(&mut self, mut f: F) -> bool {
        self.recent
            .iter_mut()
            .chain(self.snapshot.iter_mut())
            .for_each(&mut f);
        self.mark_pending()
    }

    fn mark_pending(&mut self) -> bool {
        !std::mem::replace(&mut self.pending, true)
    }

    /// Returns true if changes are waiting for a flush.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Number of buffered pushed items.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.recent.len()
    }

    /// Produces the merged view and resets the pending flag.
    pub fn flush(&mut self) -> Vec<T> {
        self.pending = false;
        self.view()
    }

    /// Produces the merged view without touching the pending flag.
    #[must_use]
    pub fn view(&self) -> Vec<T> {
        let mut by_id: HashMap<&str, &T> = HashMap::new();
        for item in &self.snapshot {
            by_id.insert(item.id(), item);
        }
        // Oldest first, so the most recent copy of an id wins.
        for item in &self.recent {
            by_id.insert(item.id(), item);
        }

        let mut merged: Vec<T> = by_id.into_values().cloned().collect();
        merged.sort_by(|a, b| {
            b.timestamp()
                .cmp(&a.timestamp())
                .then_with(|| a.id().cmp(b.id()))
        });
        merged.truncate(self.display_limit);
        merged
    }

    /// Forgets that a flush is owed, keeping buffered items. The next change
    /// reports itself as first again.
    pub fn discard_pending(&mut self) {
        self.pending = false;
    }

    /// Drops buffered items and the snapshot.
    pub fn clear(&mut self) {
        self.recent.clear();
        self.snapshot.clear();
        self.pending = false;
    }
}

struct Shared<T> {
    throttler: Mutex<UpdateThrottler<T>>,
    view: watch::Sender<Arc<Vec<T>>>,
    flushes: AtomicU64,
    liveness: Liveness,
}

impl<T: FeedItem> Shared<T> {
    fn flush(&self) {
        if !self.liveness.is_alive() {
            return;
        }
        let items = self
            .throttler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush();
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.view.send_replace(Arc::new(items));
    }
}

/// Timer-backed throttled feed.
///
/// Any number of changes inside one window produce exactly one published
/// view at the end of the window.
pub struct ThrottledFeed<T> {
    shared: Arc<Shared<T>>,
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<T> std::fmt::Debug for ThrottledFeed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledFeed")
            .field("interval", &self.interval)
            .field("flushes", &self.shared.flushes.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: FeedItem> ThrottledFeed<T> {
    /// Creates a feed whose window is scaled for `device`.
    #[must_use]
    pub fn new(config: &ThrottleConfig, device: DeviceProfile, liveness: Liveness) -> Self {
        let (view, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            shared: Arc::new(Shared {
                throttler: Mutex::new(UpdateThrottler::new(
                    config.buffer_capacity,
                    config.display_limit,
                )),
                view,
                flushes: AtomicU64::new(0),
                liveness,
            }),
            interval: config.interval_for(device),
            timer: Mutex::new(None),
        }
    }

    /// Buffers an item and schedules a flush if none is pending.
    pub fn push(&self, item: T) {
        self.change(|t| t.push(item));
    }

    /// Replaces the polled snapshot and schedules a flush if none is pending.
    pub fn set_snapshot(&self, items: Vec<T>) {
        self.change(|t| t.set_snapshot(items));
    }

    /// Modifies the item with `id` wherever it is held.
    pub fn update<F: FnMut(&mut T)>(&self, id: &str, f: F) {
        self.change(|t| t.update(id, f));
    }

    /// Modifies every held item.
    pub fn update_all<F: FnMut(&mut T)>(&self, f: F) {
        self.change(|t| t.update_all(f));
    }

    fn change<F>(&self, apply: F)
    where
        F: FnOnce(&mut UpdateThrottler<T>) -> bool,
    {
        if !self.shared.liveness.is_alive() {
            return;
        }
        let first = apply(
            &mut self
                .shared
                .throttler
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if first {
            self.schedule_flush();
        }
    }

    fn schedule_flush(&self) {
        let shared = Arc::clone(&self.shared);
        let deadline = tokio::time::Instant::now() + self.interval;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            shared.flush();
        });
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    /// Publishes the pending view now instead of at the end of the window.
    pub fn flush_now(&self) {
        if let Some(handle) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.shared.flush();
    }

    /// Last published view.
    #[must_use]
    pub fn current(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.shared.view.borrow())
    }

    /// Observes published views.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<T>>> {
        self.shared.view.subscribe()
    }

    /// Number of views published so far.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.shared.flushes.load(Ordering::Relaxed)
    }

    /// Cancels a pending flush. Later changes schedule a new one.
    pub fn cancel(&self) {
        self.shared
            .throttler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .discard_pending();
        if let Some(handle) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl<T> Drop for ThrottledFeed<T> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
