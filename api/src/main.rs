//! Panelstream API Server binary.
//!
//! Entry point for the WebSocket fan-out server.

use panelstream_api::{Server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,panelstream_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env()?;

    tracing::info!(
        "Starting Panelstream API server on {}:{} (heartbeat {:?})",
        config.host,
        config.port,
        config.heartbeat_interval
    );

    Server::new(config).run().await
}
