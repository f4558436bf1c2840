//! Price/flash reducer.
//!
//! [`PriceBook`] is the pure reducer; [`PriceFeed`] wraps it with clear
//! timers so a flash expires on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;

use super::timers::{ClearTimers, Liveness};
use crate::types::{FlashDirection, PriceUpdate};

/// Current price for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceState {
    /// Latest update.
    pub update: PriceUpdate,
    /// Direction of the last change while it is visible.
    pub flash: FlashDirection,
    /// When the flash is due to clear.
    pub expires_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl PriceState {
    /// Latest price.
    #[must_use]
    pub fn price(&self) -> Decimal {
        self.update.price
    }
}

/// Result of applying one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// Flash set by the update.
    pub flash: FlashDirection,
    /// Generation to pass to [`PriceBook::clear`].
    pub generation: u64,
}

/// Pure price reducer keyed by asset id.
#[derive(Debug, Clone)]
pub struct PriceBook {
    entries: HashMap<String, PriceState>,
    flash_for: Duration,
    next_generation: u64,
}

impl PriceBook {
    /// Creates an empty book whose flashes last `flash_for`.
    #[must_use]
    pub fn new(flash_for: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            flash_for,
            next_generation: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_generation = self.next_generation.wrapping_add(1);
        self.next_generation
    }

    /// Stores an update and computes its flash against the stored price.
    pub fn apply(&mut self, update: PriceUpdate, now: DateTime<Utc>) -> Applied {
        let generation = self.bump();
        let previous = self.entries.get(&update.asset_id).map(|s| s.update.price);
        let flash = FlashDirection::between(previous.as_ref(), &update.price);
        let expires_at = flash.is_active().then(|| {
            now + chrono::Duration::from_std(self.flash_for).unwrap_or(chrono::Duration::zero())
        });

        self.entries.insert(
            update.asset_id.clone(),
            PriceState {
                update,
                flash,
                expires_at,
                generation,
            },
        );
        Applied { flash, generation }
    }

    /// Stores a reconciled price without flashing.
    pub fn reconcile(&mut self, update: PriceUpdate) {
        let generation = self.bump();
        self.entries.insert(
            update.asset_id.clone(),
            PriceState {
                update,
                flash: FlashDirection::None,
                expires_at: None,
                generation,
            },
        );
    }

    /// Clears the flash set by `generation`.
    ///
    /// Returns false if a newer update has replaced it.
    pub fn clear(&mut self, asset_id: &str, generation: u64) -> bool {
        match self.entries.get_mut(asset_id) {
            Some(state) if state.generation == generation && state.flash.is_active() => {
                state.flash = FlashDirection::None;
                state.expires_at = None;
                true
            }
            _ => false,
        }
    }

    /// Returns the state for an asset.
    #[must_use]
    pub fn get(&self, asset_id: &str) -> Option<&PriceState> {
        self.entries.get(asset_id)
    }

    /// Removes an asset.
    pub fn remove(&mut self, asset_id: &str) -> Option<PriceState> {
        self.entries.remove(asset_id)
    }

    /// Number of tracked assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no asset is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns all states.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, PriceState> {
        self.entries.clone()
    }
}

/// Timer-backed price reducer.
///
/// Every visible change bumps the revision published by [`changes`](Self::changes).
#[derive(Debug)]
pub struct PriceFeed {
    book: Arc<Mutex<PriceBook>>,
    timers: Mutex<ClearTimers<String>>,
    flash_for: Duration,
    revision: Arc<watch::Sender<u64>>,
    liveness: Liveness,
}

impl PriceFeed {
    /// Creates a feed whose flashes last `flash_for`.
    #[must_use]
    pub fn new(flash_for: Duration, liveness: Liveness) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            book: Arc::new(Mutex::new(PriceBook::new(flash_for))),
            timers: Mutex::new(ClearTimers::new()),
            flash_for,
            revision: Arc::new(revision),
            liveness,
        }
    }

    /// Applies an update and schedules its flash to clear.
    ///
    /// Ignored once the liveness token is revoked.
    pub fn apply(&self, update: PriceUpdate) -> FlashDirection {
        if !self.liveness.is_alive() {
            return FlashDirection::None;
        }
        let asset_id = update.asset_id.clone();
        let applied = self
            .book
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(update, Utc::now());
        bump(&self.revision);

        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if !applied.flash.is_active() {
            timers.cancel(&asset_id);
            return applied.flash;
        }

        let book = Arc::clone(&self.book);
        let revision = Arc::clone(&self.revision);
        let liveness = self.liveness.clone();
        let key = asset_id.clone();
        timers.schedule(asset_id, self.flash_for, move || {
            if !liveness.is_alive() {
                return;
            }
            let cleared = book
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear(&key, applied.generation);
            if cleared {
                bump(&revision);
            }
        });
        applied.flash
    }

    /// Stores reconciled prices without flashing.
    pub fn reconcile(&self, updates: Vec<PriceUpdate>) {
        if !self.liveness.is_alive() || updates.is_empty() {
            return;
        }
        let mut book = self.book.lock().unwrap_or_else(PoisonError::into_inner);
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for update in updates {
            timers.cancel(&update.asset_id);
            book.reconcile(update);
        }
        bump(&self.revision);
    }

    /// Returns the state for one asset.
    #[must_use]
    pub fn get(&self, asset_id: &str) -> Option<PriceState> {
        self.book
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset_id)
            .cloned()
    }

    /// Returns every tracked asset.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, PriceState> {
        self.book
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Observes the revision counter.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Number of flashes still waiting to clear.
    #[must_use]
    pub fn pending_clears(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending()
    }

    /// Cancels every pending clear.
    pub fn cancel_timers(&self) {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_all();
    }
}

pub(crate) fn bump(revision: &watch::Sender<u64>) {
    revision.send_modify(|r| *r = r.wrapping_add(1));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(price: Decimal) -> PriceUpdate {
        PriceUpdate::new("spider-1", "ASM300", price)
    }

    async fn settle(by: Duration) {
        tokio::time::advance(by).await;
        tokio::task::yield_now().await;
    }

    #[test]
    fn test_flash_sequence() {
        let mut book = PriceBook::new(Duration::from_millis(500));
        let now = Utc::now();
        let flashes: Vec<FlashDirection> = [dec!(10), dec!(12), dec!(12), dec!(9)]
            .into_iter()
            .map(|p| book.apply(tick(p), now).flash)
            .collect();
        assert_eq!(
            flashes,
            vec![
                FlashDirection::None,
                FlashDirection::Up,
                FlashDirection::None,
                FlashDirection::Down
            ]
        );
        assert_eq!(book.get("spider-1").map(PriceState::price), Some(dec!(9)));
    }

    #[test]
    fn test_stale_generation_does_not_clear() {
        let mut book = PriceBook::new(Duration::from_millis(500));
        let now = Utc::now();
        book.apply(tick(dec!(10)), now);
        let first = book.apply(tick(dec!(11)), now);
        let second = book.apply(tick(dec!(12)), now);

        assert!(!book.clear("spider-1", first.generation));
        assert_eq!(
            book.get("spider-1").map(|s| s.flash),
            Some(FlashDirection::Up)
        );
        assert!(book.clear("spider-1", second.generation));
        assert_eq!(
            book.get("spider-1").map(|s| s.flash),
            Some(FlashDirection::None)
        );
    }

    #[test]
    fn test_expires_at_only_when_flashing() {
        let mut book = PriceBook::new(Duration::from_millis(500));
        let now = Utc::now();
        book.apply(tick(dec!(10)), now);
        assert!(book.get("spider-1").and_then(|s| s.expires_at).is_none());
        book.apply(tick(dec!(11)), now);
        assert_eq!(
            book.get("spider-1").and_then(|s| s.expires_at),
            Some(now + chrono::Duration::milliseconds(500))
        );
    }

    #[test]
    fn test_reconcile_does_not_flash() {
        let mut book = PriceBook::new(Duration::from_millis(500));
        book.apply(tick(dec!(10)), Utc::now());
        book.reconcile(tick(dec!(20)));
        let state = book.get("spider-1").cloned();
        assert_eq!(state.as_ref().map(PriceState::price), Some(dec!(20)));
        assert_eq!(state.map(|s| s.flash), Some(FlashDirection::None));
    }

    #[tokio::test]
    async fn test_feed_flash_auto_clears() {
        tokio::time::pause();
        let feed = PriceFeed::new(Duration::from_millis(500), Liveness::new());
        feed.apply(tick(dec!(10)));
        assert_eq!(feed.apply(tick(dec!(12))), FlashDirection::Up);

        settle(Duration::from_millis(499)).await;
        assert_eq!(feed.get("spider-1").map(|s| s.flash), Some(FlashDirection::Up));

        settle(Duration::from_millis(2)).await;
        assert_eq!(feed.get("spider-1").map(|s| s.flash), Some(FlashDirection::None));
        assert_eq!(feed.pending_clears(), 0);
    }

    #[tokio::test]
    async fn test_feed_newer_update_restarts_clear() {
        tokio::time::pause();
        let feed = PriceFeed::new(Duration::from_millis(500), Liveness::new());
        feed.apply(tick(dec!(10)));
        feed.apply(tick(dec!(12)));
        settle(Duration::from_millis(400)).await;
        assert_eq!(feed.apply(tick(dec!(9))), FlashDirection::Down);

        // The first clear would have fired here.
        settle(Duration::from_millis(200)).await;
        assert_eq!(feed.get("spider-1").map(|s| s.flash), Some(FlashDirection::Down));

        settle(Duration::from_millis(301)).await;
        assert_eq!(feed.get("spider-1").map(|s| s.flash), Some(FlashDirection::None));
    }

    #[tokio::test]
    async fn test_feed_ignores_updates_after_revoke() {
        let liveness = Liveness::new();
        let feed = PriceFeed::new(Duration::from_millis(500), liveness.clone());
        feed.apply(tick(dec!(10)));
        liveness.revoke();
        feed.apply(tick(dec!(11)));
        assert_eq!(feed.get("spider-1").map(|s| s.price()), Some(dec!(10)));
    }

    #[tokio::test]
    async fn test_feed_revision_bumps() {
        let feed = PriceFeed::new(Duration::from_millis(500), Liveness::new());
        let mut changes = feed.changes();
        feed.apply(tick(dec!(10)));
        assert!(changes.has_changed().unwrap_or(false));
        changes.mark_unchanged();
        feed.reconcile(vec![tick(dec!(11))]);
        assert_eq!(*changes.borrow_and_update(), 2);
    }
}
