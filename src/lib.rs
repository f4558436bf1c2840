//! Panelstream - real-time market data distribution.
//!
//! Re-exports the server ([`api`]) and the client SDK ([`sdk`]) so a single
//! dependency covers both ends of the stream.

pub use panelstream_api as api;
pub use panelstream_sdk as sdk;
