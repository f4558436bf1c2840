//! WebSocket module for real-time fan-out.
//!
//! Accepts client connections, tracks which topics each connection wants
//! and pushes producer updates to exactly those connections.
//!
//! # Topics
//!
//! - `asset:{id}` - Price ticks, market data and order books for one asset
//! - `portfolio:{id}` - Portfolio updates
//! - `{channel}` - Named feeds such as `victims`
//! - `broadcast` - Every connection, joined implicitly
//!
//! # Components
//!
//! - [`ConnectionRegistry`] - Live connections keyed by identity
//! - [`SubscriptionIndex`] - Topic/connection membership
//! - [`HeartbeatMonitor`] - Prunes connections that stop answering pings
//! - [`Dispatcher`] - Serializes once and fans out, isolating failed sends

pub mod close;
pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod heartbeat;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod topics;

pub use close::CloseReason;
pub use connection::Connection;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use handler::ws_handler;
pub use heartbeat::{HeartbeatMonitor, HeartbeatReport};
pub use metrics::{WsMetrics, WsMetricsSnapshot};
pub use registry::ConnectionRegistry;
pub use topics::SubscriptionIndex;
