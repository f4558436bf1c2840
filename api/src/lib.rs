//! Panelstream API - WebSocket fan-out server.
//!
//! Pushes price ticks, order books, portfolio changes, market events and
//! user notifications to connected dashboards. Each client subscribes to
//! the assets and portfolios it is showing; producers publish once and the
//! dispatcher delivers to exactly the current subscribers.
//!
//! # Modules
//!
//! - [`ws`] - Registry, subscription index, heartbeat, dispatcher and handler
//! - [`publisher`] - Typed entry point for producers
//! - [`notifications`] - Per-user notification delivery and read receipts
//! - [`server`] - Routes, heartbeat task and graceful shutdown
//!
//! # Example
//!
//! ```rust,ignore
//! use panelstream_api::{Server, ServerConfig};
//! use panelstream_sdk::PriceUpdate;
//!
//! let server = Server::new(ServerConfig::new("0.0.0.0", 8080));
//! let publisher = server.state().publisher();
//! tokio::spawn(server.run());
//!
//! publisher.publish_price(&PriceUpdate::new("spider-1", "ASM300", price)).await?;
//! ```

pub mod config;
pub mod error;
pub mod notifications;
pub mod publisher;
pub mod server;
pub mod state;
pub mod ws;

pub use config::{ConfigError, ServerConfig};
pub use error::StreamError;
pub use notifications::NotificationBus;
pub use publisher::MarketPublisher;
pub use server::Server;
pub use state::AppState;
pub use ws::{DispatchReport, Dispatcher};
