//! Connection manager.
//!
//! Owns the socket for its whole life: the first connect, every reconnect
//! after a transport loss, and disposal. Inbound frames are routed to typed
//! observers; outbound control messages go through a bounded queue drained
//! by the session task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::config::WsConfig;
use super::error::WsError;
use super::messages::{
    ControlMessage, Envelope, MessageKind, NORMAL_CLOSURE, POLICY_VIOLATION, SUPERSEDED_REASON,
};
use super::observers::{LifecycleEvent, ObserverHandle, Observers};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state published by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never connected.
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Waiting to retry after a loss.
    Reconnecting {
        /// Retry number, starting at 1.
        attempt: u32,
    },
    /// Transport lost and retries exhausted.
    Disconnected,
    /// Disposed; no further connections are made.
    Disposed,
}

enum SessionEnd {
    Lost,
    /// The server closed for a reason a retry cannot fix.
    Refused { code: u16, reason: String },
    Disposed,
}

/// Returns true for server closes that must not trigger a reconnect: a
/// rejected handshake, or this session replaced by a newer one for the same
/// identity.
fn is_terminal_close(code: u16, reason: &str) -> bool {
    code == POLICY_VIOLATION || (code == NORMAL_CLOSURE && reason == SUPERSEDED_REASON)
}

/// Resolves once the manager is disposed. The `watch::Ref` never outlives
/// the call, so callers stay `Send`.
async fn disposed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|disposed| *disposed).await;
}

struct Inner {
    config: WsConfig,
    observers: Observers,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    status: watch::Sender<ConnectionStatus>,
    shutdown: watch::Sender<bool>,
    stale: AtomicBool,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Client-side owner of the streaming connection.
///
/// Cheap to clone; all clones share one socket.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a manager with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: WsConfig) -> Result<Self, WsError> {
        config.validate()?;
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                observers: Observers::new(),
                outbound: Mutex::new(None),
                status,
                shutdown,
                stale: AtomicBool::new(false),
                supervisor: Mutex::new(None),
            }),
        })
    }

    /// Creates a manager for the given URL and identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_identity(url: impl Into<String>, identity: impl Into<String>) -> Result<Self, WsError> {
        Self::new(WsConfig::new(url).with_identity(identity))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &WsConfig {
        &self.inner.config
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Returns a receiver that observes state changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Returns true while the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Returns true while data received before a loss is being shown
    /// without a live connection behind it.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.inner.stale.load(Ordering::Acquire)
    }

    fn is_disposed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Observer registry fed by this connection.
    #[must_use]
    pub fn observers(&self) -> &Observers {
        &self.inner.observers
    }

    /// Registers a handler for one frame kind.
    #[must_use = "dropping the handle unsubscribes the handler"]
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F) -> ObserverHandle
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(kind, handler)
    }

    /// Registers a handler for the first successful connection.
    #[must_use = "dropping the handle unsubscribes the handler"]
    pub fn on_connect<F>(&self, handler: F) -> ObserverHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.observers.on(LifecycleEvent::Connect, handler)
    }

    /// Registers a handler for transport loss.
    #[must_use = "dropping the handle unsubscribes the handler"]
    pub fn on_disconnect<F>(&self, handler: F) -> ObserverHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.observers.on(LifecycleEvent::Disconnect, handler)
    }

    /// Registers a handler for every connection after the first.
    #[must_use = "dropping the handle unsubscribes the handler"]
    pub fn on_reconnect<F>(&self, handler: F) -> ObserverHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.observers.on(LifecycleEvent::Reconnect, handler)
    }

    /// Queues a control message for the server.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` while no socket is open, `Disposed` after
    /// [`dispose`](Self::dispose), and `SendFailed` if the queue is full.
    pub fn send(&self, message: &ControlMessage) -> Result<(), WsError> {
        if self.is_disposed() {
            return Err(WsError::Disposed);
        }
        let json = serde_json::to_string(message)?;

        let slot = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = slot.as_ref().ok_or(WsError::NotConnected)?;
        tx.try_send(Message::Text(json.into())).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                WsError::SendFailed("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => WsError::NotConnected,
        })
    }

    /// Opens the connection and keeps it open in the background.
    ///
    /// The first attempt is made inline so the caller sees its failure.
    /// Later losses are retried with backoff until the manager is disposed
    /// or the retry limit is reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the first attempt fails or the manager is disposed.
    pub async fn connect(&self) -> Result<(), WsError> {
        if self.is_disposed() {
            return Err(WsError::Disposed);
        }
        if self.supervisor_running() {
            return Ok(());
        }

        self.inner.status.send_replace(ConnectionStatus::Connecting);
        let stream = match self.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.inner.status.send_replace(ConnectionStatus::Idle);
                return Err(e);
            }
        };

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = manager.supervise(Some(stream)).await {
                warn!(error = %e, "connection supervisor stopped");
            }
        });
        *self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Connects with backoff and keeps the connection alive until disposed.
    ///
    /// Unlike [`connect`](Self::connect), a failed first attempt is retried.
    ///
    /// # Errors
    ///
    /// Returns `ReconnectExhausted` when the retry limit is reached.
    pub async fn run(&self) -> Result<(), WsError> {
        if self.is_disposed() {
            return Err(WsError::Disposed);
        }
        self.supervise(None).await
    }

    /// Closes the socket, cancels reconnection and drops queued messages.
    ///
    /// Idempotent. Observers registered through handles stay registered
    /// until their handles are dropped, but receive nothing further.
    pub fn dispose(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        self.inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.status.send_replace(ConnectionStatus::Disposed);
        info!(url = %self.inner.config.url, "connection manager disposed");
    }

    fn supervisor_running(&self) -> bool {
        self.inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn open(&self) -> Result<WsStream, WsError> {
        let url = self.inner.config.connection_url();
        debug!(url = %self.inner.config.url, "connecting");
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| WsError::Connection(e.to_string()))?;
        Ok(stream)
    }

    async fn supervise(&self, mut first: Option<WsStream>) -> Result<(), WsError> {
        let config = &self.inner.config;
        let mut backoff = Backoff::new(config.reconnect_delay, config.max_reconnect_delay);
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut sessions: u64 = 0;

        loop {
            let stream = match first.take() {
                Some(stream) => stream,
                None => loop {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                    if sessions == 0 && backoff.attempts() == 0 {
                        self.inner.status.send_replace(ConnectionStatus::Connecting);
                    }
                    match self.open().await {
                        Ok(stream) => break stream,
                        Err(e) => {
                            if let Some(max) = config.max_reconnect_attempts {
                                if backoff.attempts() >= max {
                                    self.inner.status.send_replace(ConnectionStatus::Disconnected);
                                    return Err(WsError::ReconnectExhausted(max));
                                }
                            }
                            let delay = backoff.next_delay();
                            let attempt = backoff.attempts();
                            self.inner
                                .status
                                .send_replace(ConnectionStatus::Reconnecting { attempt });
                            warn!(
                                error = %e,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "connection attempt failed, retrying"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                () = disposed(&mut shutdown) => return Ok(()),
                            }
                        }
                    }
                },
            };

            backoff.reset();
            let reconnected = sessions > 0;
            sessions = sessions.saturating_add(1);

            match self.session(stream, reconnected, &mut shutdown).await {
                SessionEnd::Disposed => return Ok(()),
                SessionEnd::Refused { code, reason } => {
                    self.inner
                        .outbound
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    self.inner.stale.store(true, Ordering::Release);
                    self.inner.status.send_replace(ConnectionStatus::Disconnected);
                    self.inner.observers.emit_lifecycle(LifecycleEvent::Disconnect);
                    warn!(code, reason = %reason, "server refused session, not reconnecting");
                    return Err(WsError::Refused { code, reason });
                }
                SessionEnd::Lost => {
                    self.inner
                        .outbound
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                    self.inner.stale.store(true, Ordering::Release);
                    self.inner
                        .status
                        .send_replace(ConnectionStatus::Reconnecting { attempt: 1 });
                    self.inner.observers.emit_lifecycle(LifecycleEvent::Disconnect);
                }
            }
        }
    }

    async fn session(
        &self,
        stream: WsStream,
        reconnected: bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::channel::<Message>(self.inner.config.outbound_buffer);

        *self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.inner.stale.store(false, Ordering::Release);
        self.inner.status.send_replace(ConnectionStatus::Connected);

        if reconnected {
            info!(url = %self.inner.config.url, "reconnected");
            self.inner.observers.emit_lifecycle(LifecycleEvent::Reconnect);
        } else {
            info!(url = %self.inner.config.url, "connected");
            self.inner.observers.emit_lifecycle(LifecycleEvent::Connect);
        }

        loop {
            tokio::select! {
                () = disposed(shutdown) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Disposed;
                }
                Some(message) = rx.recv() => {
                    if let Err(e) = sink.send(message).await {
                        warn!(error = %e, "send failed, dropping connection");
                        return SessionEnd::Lost;
                    }
                }
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.route(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        let Some(frame) = frame else {
                            info!("server closed connection");
                            return SessionEnd::Lost;
                        };
                        let code = u16::from(frame.code);
                        let reason = frame.reason.as_str().to_string();
                        info!(code, reason = %reason, "server closed connection");
                        if is_terminal_close(code, &reason) {
                            return SessionEnd::Refused { code, reason };
                        }
                        return SessionEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "transport error");
                        return SessionEnd::Lost;
                    }
                    None => return SessionEnd::Lost,
                },
            }
        }
    }

    fn route(&self, text: &str) {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => {
                if envelope.kind == MessageKind::Error {
                    warn!(data = %envelope.data, "server error frame");
                }
                self.inner.observers.emit(&envelope);
            }
            Err(e) => debug!(error = %e, "ignoring undecodable frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("ws://{}/ws", addr)
    }

    #[test]
    fn test_manager_new() {
        let manager = ConnectionManager::with_identity("ws://127.0.0.1:1/ws", "alice");
        assert!(manager.is_ok());
    }

    #[test]
    fn test_manager_invalid_config() {
        assert!(ConnectionManager::new(WsConfig::new("")).is_err());
    }

    #[test]
    fn test_manager_initial_state() {
        let manager = ConnectionManager::new(WsConfig::default()).expect("manager");
        assert_eq!(manager.status(), ConnectionStatus::Idle);
        assert!(!manager.is_connected());
        assert!(!manager.is_stale());
    }

    #[test]
    fn test_send_while_disconnected() {
        let manager = ConnectionManager::new(WsConfig::default()).expect("manager");
        let result = manager.send(&ControlMessage::Ping);
        assert!(matches!(result, Err(WsError::NotConnected)));
    }

    #[tokio::test]
    async fn test_dispose_is_terminal() {
        let manager = ConnectionManager::new(WsConfig::default()).expect("manager");
        manager.dispose();
        manager.dispose();
        assert_eq!(manager.status(), ConnectionStatus::Disposed);
        assert!(matches!(manager.send(&ControlMessage::Ping), Err(WsError::Disposed)));
        assert!(matches!(manager.connect().await, Err(WsError::Disposed)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let url = closed_port_url().await;
        let manager = ConnectionManager::with_identity(url, "alice").expect("manager");
        let result = manager.connect().await;
        assert!(matches!(result, Err(WsError::Connection(_))));
        assert_eq!(manager.status(), ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_limit() {
        let url = closed_port_url().await;
        let config = WsConfig::new(url)
            .with_identity("alice")
            .with_reconnect_delay(Duration::from_millis(5))
            .with_max_reconnect_delay(Duration::from_millis(10))
            .with_max_reconnect_attempts(2);
        let manager = ConnectionManager::new(config).expect("manager");

        let result = manager.run().await;
        assert!(matches!(result, Err(WsError::ReconnectExhausted(2))));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_dispose_stops_run() {
        let url = closed_port_url().await;
        let config = WsConfig::new(url)
            .with_identity("alice")
            .with_reconnect_delay(Duration::from_millis(50));
        let manager = ConnectionManager::new(config).expect("manager");

        let runner = manager.clone();
        let task = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.dispose();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("run returns after dispose")
            .expect("join");
        tokio_test::assert_ok!(result);
    }

    /// Accepts one socket per request and keeps it open until the peer closes.
    async fn holding_server_url() -> String {
        use axum::extract::ws::WebSocketUpgrade;
        use axum::routing::get;

        let app = axum::Router::new().route(
            "/ws",
            get(|ws: WebSocketUpgrade| async move {
                ws.on_upgrade(|mut socket| async move {
                    while let Some(Ok(_)) = socket.recv().await {}
                })
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("ws://{}/ws", addr)
    }

    #[tokio::test]
    async fn test_dispose_ends_open_session() {
        let url = holding_server_url().await;
        let manager = ConnectionManager::with_identity(url, "alice").expect("manager");
        manager.connect().await.expect("connect");

        let mut status = manager.watch_status();
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| *s == ConnectionStatus::Connected),
        )
        .await
        .expect("connected in time")
        .expect("status");

        manager.dispose();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while manager.supervisor_running() {
            assert!(tokio::time::Instant::now() < deadline, "supervisor still running");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.status(), ConnectionStatus::Disposed);
    }

    #[test]
    fn test_terminal_close_codes() {
        assert!(is_terminal_close(1008, "missing userId query parameter"));
        assert!(is_terminal_close(1000, "superseded"));
        assert!(!is_terminal_close(1000, ""));
        assert!(!is_terminal_close(1001, "server shutting down"));
        assert!(!is_terminal_close(1001, "heartbeat timeout"));
    }

    #[test]
    fn test_route_delivers_to_observers() {
        let manager = ConnectionManager::new(WsConfig::default()).expect("manager");
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _handle = manager.subscribe(MessageKind::Pong, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let frame = serde_json::to_string(&Envelope::pong()).expect("serialize");
        manager.route(&frame);
        manager.route("not json");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
