//! Order book snapshot types.
//!
//! Snapshots carry full replacement semantics: each one supersedes the
//! previous snapshot for the same asset.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SdkError;

/// A price level in the order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookLevel {
    /// Level price.
    pub price: Decimal,

    /// Resting quantity at this level.
    pub quantity: u64,

    /// Notional value (`price * quantity`).
    pub total: Decimal,
}

impl BookLevel {
    /// Creates a new book level, deriving the total.
    #[must_use]
    pub fn new(price: Decimal, quantity: u64) -> Self {
        Self {
            price,
            quantity,
            total: price * Decimal::from(quantity),
        }
    }
}

impl fmt::Display for BookLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} ({})", self.quantity, self.price, self.total)
    }
}

/// Full order book snapshot for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookSnapshot {
    /// Asset id.
    pub asset_id: String,

    /// Display symbol.
    pub symbol: String,

    /// Bid levels (sorted by price descending).
    pub bids: Vec<BookLevel>,

    /// Ask levels (sorted by price ascending).
    pub asks: Vec<BookLevel>,

    /// Absolute spread between best ask and best bid.
    pub spread: Decimal,

    /// Spread as a percentage of the best bid.
    pub spread_percent: Decimal,

    /// Producer timestamp.
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    /// Builds a snapshot from levels, computing spread figures.
    #[must_use]
    pub fn from_levels(
        asset_id: impl Into<String>,
        symbol: impl Into<String>,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut book = Self {
            asset_id: asset_id.into(),
            symbol: symbol.into(),
            bids,
            asks,
            spread: Decimal::ZERO,
            spread_percent: Decimal::ZERO,
            timestamp,
        };
        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            book.spread = ask - bid;
            if !bid.is_zero() {
                book.spread_percent = (book.spread / bid * Decimal::ONE_HUNDRED).round_dp(4);
            }
        }
        book
    }

    /// Returns the best bid price.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Returns the best ask price.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Returns the number of bid levels.
    #[must_use]
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    /// Returns the number of ask levels.
    #[must_use]
    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Returns true if the book is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Checks the level ordering invariant.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidOrderBook` if bids are not strictly
    /// descending or asks are not strictly ascending.
    pub fn validate(&self) -> Result<(), SdkError> {
        if !self.bids.windows(2).all(|w| matches!(w, [a, b] if a.price > b.price)) {
            return Err(self.invalid("bids must be strictly price-descending"));
        }
        if !self.asks.windows(2).all(|w| matches!(w, [a, b] if a.price < b.price)) {
            return Err(self.invalid("asks must be strictly price-ascending"));
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> SdkError {
        SdkError::InvalidOrderBook {
            symbol: self.symbol.clone(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for OrderBookSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OrderBook {} (spread: {})", self.symbol, self.spread)?;
        writeln!(f, "  Asks:")?;
        for level in self.asks.iter().take(5).rev() {
            writeln!(f, "    {}", level)?;
        }
        writeln!(f, "  ---")?;
        writeln!(f, "  Bids:")?;
        for level in self.bids.iter().take(5) {
            writeln!(f, "    {}", level)?;
        }
        Ok(())
    }
}
