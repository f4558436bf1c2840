//! Live state reducers for UI views.
//!
//! Everything here is driven by frames from a [`ConnectionManager`](crate::ws::ConnectionManager):
//!
//! - [`PriceFeed`] and [`BookFeed`] annotate changes with short-lived flashes
//! - [`ThrottledFeed`] batches notification and event bursts into one update per window
//! - [`SubscriptionManager`] keeps the server's subscription set equal to the desired set
//! - [`MarketStream`] wires them together for one view

pub mod alerts;
pub mod config;
pub mod order_book;
pub mod prices;
pub mod stream;
pub mod subscriptions;
pub mod throttle;
pub mod timers;

pub use alerts::{AlertError, AlertSink, LogAlerts, MinPriority};
pub use config::{DeviceProfile, SyncConfig, ThrottleConfig};
pub use order_book::{BookFeed, BookMerger, FlashedBook, FlashedLevel};
pub use prices::{Applied, PriceBook, PriceFeed, PriceState};
pub use stream::{MarketStream, MarketStreamBuilder};
pub use subscriptions::{ControlSink, SubscriptionManager};
pub use throttle::{FeedItem, ThrottledFeed, UpdateThrottler};
pub use timers::{ClearTimers, Liveness};
