//! HTTP server.
//!
//! Mounts the WebSocket endpoint and the health and stats routes, runs the
//! heartbeat monitor for the lifetime of the server and closes every open
//! connection with going-away on shutdown.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::state::AppState;
use crate::ws::{ws_handler, CloseReason, HeartbeatMonitor, WsMetricsSnapshot};

/// The streaming server.
#[derive(Debug, Clone)]
pub struct Server {
    state: AppState,
}

impl Server {
    /// Creates a server with fresh state.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: AppState::new(config),
        }
    }

    /// Creates a server around existing state.
    #[must_use]
    pub fn with_state(state: AppState) -> Self {
        Self { state }
    }

    /// Returns the shared state, for producers that publish into it.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Builds the router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health))
            .route("/stats", get(stats))
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
    }

    /// Binds the configured address and serves until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.state.config.validate()?;
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        info!(addr = %listener.local_addr()?, "listening");
        self.serve(listener, shutdown_signal()).await
    }

    /// Serves on `listener` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = &self.state.config;
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            Arc::clone(&self.state.registry),
            Arc::clone(&self.state.metrics),
            config.heartbeat_interval,
            config.ping_timeout,
        ))
        .spawn();

        let registry = Arc::clone(&self.state.registry);
        let router = self.router();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let closed = registry
                    .close_all(CloseReason::GoingAway, "server shutting down")
                    .await;
                info!(closed, "shutting down");
            })
            .await;

        heartbeat.abort();
        result?;
        info!("server stopped");
        Ok(())
    }
}

/// Health check handler.
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "clients": state.registry.len().await,
        "subscriptions": state.index().total_subscriptions().await,
        "topics": state.index().topic_count().await,
    }))
}

/// Metrics handler.
async fn stats(State(state): State<AppState>) -> Json<WsMetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received terminate signal"),
    }
}
