//! Order-book merger.
//!
//! Each snapshot replaces the previous one in full. Rows are compared with
//! the row at the same index in the previous snapshot, not with the row at
//! the same price, so a level shifting down one row flashes against its new
//! neighbour.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use super::prices::bump;
use super::timers::{ClearTimers, Liveness};
use crate::error::SdkError;
use crate::types::{BookLevel, FlashDirection, OrderBookSnapshot};

/// A book row with its flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashedLevel {
    /// Level from the snapshot.
    pub level: BookLevel,
    /// Quantity movement against the previous row at this index.
    pub flash: FlashDirection,
}

/// A merged, flash-annotated book.
#[derive(Debug, Clone, PartialEq)]
pub struct FlashedBook {
    /// Snapshot the rows came from.
    pub snapshot: OrderBookSnapshot,
    /// Bid rows, best first.
    pub bids: Vec<FlashedLevel>,
    /// Ask rows, best first.
    pub asks: Vec<FlashedLevel>,
    generation: u64,
}

impl FlashedBook {
    /// Returns true if any row is flashing.
    #[must_use]
    pub fn has_flash(&self) -> bool {
        self.bids
            .iter()
            .chain(self.asks.iter())
            .any(|row| row.flash.is_active())
    }

    fn clear_flashes(&mut self) {
        for row in self.bids.iter_mut().chain(self.asks.iter_mut()) {
            row.flash = FlashDirection::None;
        }
    }
}

/// Annotates `next` rows by comparing quantities with `previous` by index.
#[must_use]
pub fn flash_rows(previous: &[BookLevel], next: &[BookLevel]) -> Vec<FlashedLevel> {
    next.iter()
        .enumerate()
        .map(|(i, level)| FlashedLevel {
            flash: FlashDirection::between(
                previous.get(i).map(|p| &p.quantity),
                &level.quantity,
            ),
            level: level.clone(),
        })
        .collect()
}

/// Pure order-book reducer keyed by asset id.
#[derive(Debug, Clone, Default)]
pub struct BookMerger {
    books: HashMap<String, FlashedBook>,
    next_generation: u64,
}

impl BookMerger {
    /// Creates an empty merger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the book for the snapshot's asset.
    ///
    /// Returns the generation to pass to [`clear`](Self::clear), or an error
    /// if the snapshot violates price ordering. A rejected snapshot leaves
    /// the previous book in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOrderBook` if bids are not strictly descending or
    /// asks not strictly ascending.
    pub fn merge(&mut self, snapshot: OrderBookSnapshot) -> Result<u64, SdkError> {
        snapshot.validate()?;
        self.next_generation = self.next_generation.wrapping_add(1);
        let generation = self.next_generation;

        let (bids, asks) = match self.books.get(&snapshot.asset_id) {
            Some(prev) => (
                flash_rows(&prev.snapshot.bids, &snapshot.bids),
                flash_rows(&prev.snapshot.asks, &snapshot.asks),
            ),
            None => (flash_rows(&[], &snapshot.bids), flash_rows(&[], &snapshot.asks)),
        };

        self.books.insert(
            snapshot.asset_id.clone(),
            FlashedBook {
                snapshot,
                bids,
                asks,
                generation,
            },
        );
        Ok(generation)
    }

    /// Clears the flashes set by `generation`.
    pub fn clear(&mut self, asset_id: &str, generation: u64) -> bool {
        match self.books.get_mut(asset_id) {
            Some(book) if book.generation == generation && book.has_flash() => {
                book.clear_flashes();
                true
            }
            _ => false,
        }
    }

    /// Returns the merged book for an asset.
    #[must_use]
    pub fn get(&self, asset_id: &str) -> Option<&FlashedBook> {
        self.books.get(asset_id)
    }

    /// Number of tracked books.
    #[must_use]
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Returns true if no book is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

/// Timer-backed order-book merger.
#[derive(Debug)]
pub struct BookFeed {
    merger: Arc<Mutex<BookMerger>>,
    timers: Mutex<ClearTimers<String>>,
    flash_for: Duration,
    revision: Arc<watch::Sender<u64>>,
    liveness: Liveness,
}

impl BookFeed {
    /// Creates a feed whose row flashes last `flash_for`.
    #[must_use]
    pub fn new(flash_for: Duration, liveness: Liveness) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            merger: Arc::new(Mutex::new(BookMerger::new())),
            timers: Mutex::new(ClearTimers::new()),
            flash_for,
            revision: Arc::new(revision),
            liveness,
        }
    }

    /// Merges a snapshot and schedules its flashes to clear.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot violates price ordering.
    pub fn merge(&self, snapshot: OrderBookSnapshot) -> Result<(), SdkError> {
        if !self.liveness.is_alive() {
            return Ok(());
        }
        let asset_id = snapshot.asset_id.clone();
        let (generation, flashing) = {
            let mut merger = self.merger.lock().unwrap_or_else(PoisonError::into_inner);
            let generation = merger.merge(snapshot).inspect_err(|e| {
                warn!(asset_id = %asset_id, error = %e, "rejected order book snapshot");
            })?;
            let flashing = merger.get(&asset_id).is_some_and(FlashedBook::has_flash);
            (generation, flashing)
        };
        bump(&self.revision);

        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if !flashing {
            timers.cancel(&asset_id);
            return Ok(());
        }
        let merger = Arc::clone(&self.merger);
        let revision = Arc::clone(&self.revision);
        let liveness = self.liveness.clone();
        let key = asset_id.clone();
        timers.schedule(asset_id, self.flash_for, move || {
            if !liveness.is_alive() {
                return;
            }
            let cleared = merger
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear(&key, generation);
            if cleared {
                bump(&revision);
            }
        });
        Ok(())
    }

    /// Returns the merged book for an asset.
    #[must_use]
    pub fn get(&self, asset_id: &str) -> Option<FlashedBook> {
        self.merger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset_id)
            .cloned()
    }

    /// Observes the revision counter.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Cancels every pending clear.
    pub fn cancel_timers(&self) {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn book(bids: &[(u32, u64)], asks: &[(u32, u64)]) -> OrderBookSnapshot {
        let levels = |rows: &[(u32, u64)]| {
            rows.iter()
                .map(|(p, q)| BookLevel::new((*p).into(), *q))
                .collect::<Vec<_>>()
        };
        OrderBookSnapshot::from_levels("spider-1", "ASM300", levels(bids), levels(asks), Utc::now())
    }

    fn bid_flashes(book: &FlashedBook) -> Vec<FlashDirection> {
        book.bids.iter().map(|r| r.flash).collect()
    }

    #[test]
    fn test_quantity_changes_flash() {
        let mut merger = BookMerger::new();
        merger.merge(book(&[(100, 100)], &[(101, 10)])).expect("first");
        merger.merge(book(&[(100, 150)], &[(101, 10)])).expect("second");
        let merged = merger.get("spider-1").cloned().expect("book");
        assert_eq!(bid_flashes(&merged), vec![FlashDirection::Up]);
        assert_eq!(merged.asks[0].flash, FlashDirection::None);

        merger.merge(book(&[(100, 90)], &[(101, 10)])).expect("third");
        let merged = merger.get("spider-1").cloned().expect("book");
        assert_eq!(bid_flashes(&merged), vec![FlashDirection::Down]);
    }

    #[test]
    fn test_first_snapshot_and_new_rows_do_not_flash() {
        let mut merger = BookMerger::new();
        merger.merge(book(&[(100, 5)], &[])).expect("first");
        assert!(!merger.get("spider-1").expect("book").has_flash());

        merger.merge(book(&[(100, 5), (99, 7)], &[])).expect("second");
        let merged = merger.get("spider-1").cloned().expect("book");
        assert_eq!(
            bid_flashes(&merged),
            vec![FlashDirection::None, FlashDirection::None]
        );
    }

    #[test]
    fn test_rows_compare_by_index() {
        let mut merger = BookMerger::new();
        merger.merge(book(&[(100, 50), (99, 20)], &[])).expect("first");
        // Top level removed; 99 moves to row 0 and is compared with the old 100.
        merger.merge(book(&[(99, 20)], &[])).expect("second");
        let merged = merger.get("spider-1").cloned().expect("book");
        assert_eq!(bid_flashes(&merged), vec![FlashDirection::Down]);
    }

    #[test]
    fn test_invalid_snapshot_keeps_previous() {
        let mut merger = BookMerger::new();
        merger.merge(book(&[(100, 5)], &[(101, 5)])).expect("valid");
        let bad = book(&[(99, 5), (100, 5)], &[(101, 5)]);
        assert!(matches!(
            merger.merge(bad),
            Err(SdkError::InvalidOrderBook { .. })
        ));
        let kept = merger.get("spider-1").expect("book");
        assert_eq!(kept.bids.len(), 1);
        assert_eq!(kept.snapshot.best_bid(), Some(dec!(100)));
    }

    #[test]
    fn test_clear_checks_generation() {
        let mut merger = BookMerger::new();
        merger.merge(book(&[(100, 1)], &[])).expect("first");
        let stale = merger.merge(book(&[(100, 2)], &[])).expect("second");
        let fresh = merger.merge(book(&[(100, 3)], &[])).expect("third");
        assert!(!merger.clear("spider-1", stale));
        assert!(merger.clear("spider-1", fresh));
        assert!(!merger.get("spider-1").expect("book").has_flash());
    }

    #[tokio::test]
    async fn test_feed_clears_after_flash_window() {
        tokio::time::pause();
        let feed = BookFeed::new(Duration::from_millis(300), Liveness::new());
        feed.merge(book(&[(100, 100)], &[])).expect("first");
        feed.merge(book(&[(100, 150)], &[])).expect("second");
        assert!(feed.get("spider-1").expect("book").has_flash());

        tokio::time::advance(Duration::from_millis(301)).await;
        tokio::task::yield_now().await;
        assert!(!feed.get("spider-1").expect("book").has_flash());
    }
}
