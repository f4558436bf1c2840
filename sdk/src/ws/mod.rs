//! Streaming connection.
//!
//! [`ConnectionManager`] owns the socket to the Panelstream server: it
//! connects, reconnects with capped exponential backoff and routes every
//! inbound [`Envelope`] to observers registered by [`MessageKind`].
//!
//! # Example
//!
//! ```rust,ignore
//! use panelstream_sdk::ws::{ConnectionManager, ControlMessage, MessageKind, WsConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::new(
//!         WsConfig::new("ws://127.0.0.1:8080/ws").with_identity("alice"),
//!     )?;
//!
//!     let _prices = manager.subscribe(MessageKind::PriceUpdate, |envelope| {
//!         println!("{:?}", envelope.data);
//!     });
//!
//!     manager.connect().await?;
//!     manager.send(&ControlMessage::SubscribeAssets {
//!         asset_ids: vec!["spider-1".to_string()],
//!     })?;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod observers;

pub use backoff::Backoff;
pub use client::{ConnectionManager, ConnectionStatus};
pub use config::WsConfig;
pub use error::WsError;
pub use messages::{ControlMessage, Envelope, MessageKind, SUPERSEDED_REASON};
pub use observers::{LifecycleEvent, ObserverHandle, Observers};
