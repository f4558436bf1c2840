//! Panelstream SDK - client library for the Panelstream live market stream.
//!
//! This crate holds the wire types shared with the server and everything a
//! dashboard needs to stay in sync with it.
//!
//! # Modules
//!
//! - [`types`] - Payloads carried in wire envelopes (prices, books, notifications)
//! - [`ws`] - Envelope codec and the reconnecting [`ConnectionManager`]
//! - [`sync`] - Flash reducers, throttled feeds and subscription tracking
//! - [`client`] - REST snapshot client used to reconcile after a reconnect
//!
//! # Example
//!
//! ```rust
//! use panelstream_sdk::{FlashDirection, PriceBook, PriceUpdate};
//! use rust_decimal::Decimal;
//! use chrono::Utc;
//! use std::time::Duration;
//!
//! let mut book = PriceBook::new(Duration::from_millis(500));
//! book.apply(PriceUpdate::new("spider-1", "ASM300", Decimal::from(10)), Utc::now());
//! let applied = book.apply(PriceUpdate::new("spider-1", "ASM300", Decimal::from(12)), Utc::now());
//! assert_eq!(applied.flash, FlashDirection::Up);
//! ```

pub mod client;
pub mod error;
pub mod sync;
pub mod types;
pub mod ws;

pub use client::{ClientConfig, ClientError, SnapshotClient};
pub use error::SdkError;
pub use sync::{
    DeviceProfile, MarketStream, PriceBook, PriceFeed, SubscriptionManager, SyncConfig,
    ThrottledFeed,
};
pub use types::{
    BookLevel, FlashDirection, MarketData, MarketEvent, MarketPulse, Notification,
    NotificationKind, OrderBookSnapshot, PortfolioUpdate, PriceUpdate, Priority, Sentiment, Topic,
    Trend,
};
pub use ws::{ConnectionManager, ConnectionStatus, ControlMessage, Envelope, MessageKind, WsConfig};
