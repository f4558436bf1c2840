//! REST snapshot client.
//!
//! Used to reconcile live state after a reconnect and to feed the polled
//! snapshot side of the notification throttler.
//!
//! # Example
//!
//! ```rust,ignore
//! use panelstream_sdk::client::{ClientConfig, SnapshotClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SnapshotClient::new(
//!         ClientConfig::new("http://127.0.0.1:8080/api").with_identity("alice"),
//!     )?;
//!
//!     let prices = client.get_prices(&["spider-1".to_string()]).await?;
//!     let page = client.get_notifications().await?;
//!     println!("{} prices, {} unread", prices.len(), page.unread_count);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http;

pub use config::ClientConfig;
pub use error::ClientError;
pub use http::{NotificationPage, SnapshotClient};
