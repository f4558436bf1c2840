//! Core types for the Panelstream SDK.
//!
//! Payloads carried inside wire envelopes, shared by server and client.

pub mod book;
pub mod flash;
pub mod market;
pub mod notification;
pub mod topic;

pub use book::{BookLevel, OrderBookSnapshot};
pub use flash::FlashDirection;
pub use market::{
    MarketData, MarketEvent, MarketPulse, PortfolioUpdate, PriceUpdate, Sentiment, Trend,
};
pub use notification::{Notification, NotificationKind, Priority};
pub use topic::Topic;
