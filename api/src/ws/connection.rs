//! WebSocket connection state.
//!
//! A [`Connection`] is the server's handle on one accepted socket: its
//! identity, the sender side of its outbound queue and its liveness flag.
//! The socket itself is owned by the handler task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};

use super::close::CloseReason;
use crate::error::StreamError;

/// Global connection ID counter.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a unique connection ID.
#[must_use]
pub fn next_connection_id() -> u64 {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Server-side state for one WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    identity: String,
    sender: mpsc::Sender<Message>,
    alive: AtomicBool,
    last_pong: Mutex<Instant>,
    connected_at: DateTime<Utc>,
    closed: AtomicBool,
    terminated: Notify,
}

impl Connection {
    /// Creates a live connection for `identity`.
    #[must_use]
    pub fn new(identity: impl Into<String>, sender: mpsc::Sender<Message>) -> Self {
        Self {
            id: next_connection_id(),
            identity: identity.into(),
            sender,
            alive: AtomicBool::new(true),
            last_pong: Mutex::new(Instant::now()),
            connected_at: Utc::now(),
            closed: AtomicBool::new(false),
            terminated: Notify::new(),
        }
    }

    /// Returns the connection ID.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the identity extracted from the handshake.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Returns when the handshake was accepted.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Returns true if the connection answered since the last heartbeat.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Records a pong or application ping.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
        *self.last_pong.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Clears the liveness flag, returning its previous value.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Time since the last pong.
    #[must_use]
    pub fn since_last_pong(&self) -> Duration {
        self.last_pong
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Returns true once [`terminate`](Self::terminate) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queues a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Dispatch` if the queue is full or the writer has gone.
    pub fn try_send(&self, message: Message) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(self.dispatch_error("connection closed"));
        }
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => self.dispatch_error("outbound queue full"),
            mpsc::error::TrySendError::Closed(_) => self.dispatch_error("writer closed"),
        })
    }

    /// Queues a pre-serialized text frame.
    ///
    /// # Errors
    ///
    /// Returns `Dispatch` if the frame could not be queued.
    pub fn send_text(&self, text: Utf8Bytes) -> Result<(), StreamError> {
        self.try_send(Message::Text(text))
    }

    /// Queues a ping, waiting at most `timeout` for queue space.
    ///
    /// Returns false if the ping could not be queued in time.
    pub async fn ping(&self, timeout: Duration) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sender
            .send_timeout(Message::Ping(Bytes::new()), timeout)
            .await
            .is_ok()
    }

    /// Closes the connection with `reason`.
    ///
    /// Queues a close frame if there is room and wakes the read loop so the
    /// socket is released even when the peer has stopped reading. Returns
    /// false if the connection was already terminated.
    pub fn terminate(&self, reason: CloseReason, text: &str) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // A full queue means the close frame is dropped; the socket is still released.
        let _ = self.sender.try_send(reason.frame(text));
        self.terminated.notify_one();
        true
    }

    /// Resolves once the connection has been terminated.
    pub async fn terminated(&self) {
        if self.is_closed() {
            return;
        }
        self.terminated.notified().await;
    }

    fn dispatch_error(&self, reason: &str) -> StreamError {
        StreamError::Dispatch {
            connection_id: self.id,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::close::{GOING_AWAY, NORMAL};

    #[test]
    fn test_next_connection_id() {
        let id1 = next_connection_id();
        let id2 = next_connection_id();
        assert!(id2 > id1);
    }

    #[tokio::test]
    async fn test_connection_new() {
        let (tx, _rx) = mpsc::channel(10);
        let conn = Connection::new("alice", tx);
        assert!(conn.id() > 0);
        assert_eq!(conn.identity(), "alice");
        assert!(conn.is_alive());
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_connection_liveness() {
        let (tx, _rx) = mpsc::channel(10);
        let conn = Connection::new("alice", tx);

        assert!(conn.take_alive());
        assert!(!conn.is_alive());
        assert!(!conn.take_alive());

        conn.mark_alive();
        assert!(conn.is_alive());
        assert!(conn.since_last_pong() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_connection_send() {
        let (tx, mut rx) = mpsc::channel(10);
        let conn = Connection::new("alice", tx);

        conn.send_text(Utf8Bytes::from_static("{}")).expect("send");
        let msg = rx.recv().await;
        assert!(matches!(msg, Some(Message::Text(_))));
    }

    #[tokio::test]
    async fn test_connection_send_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new("alice", tx);

        conn.send_text(Utf8Bytes::from_static("1")).expect("first");
        let err = conn.send_text(Utf8Bytes::from_static("2")).expect_err("full");
        assert!(matches!(err, StreamError::Dispatch { connection_id, .. } if connection_id == conn.id()));
    }

    #[tokio::test]
    async fn test_connection_ping_times_out_on_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new("alice", tx);

        assert!(conn.ping(Duration::from_millis(10)).await);
        assert!(!conn.ping(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_connection_terminate_once() {
        let (tx, mut rx) = mpsc::channel(10);
        let conn = Connection::new("alice", tx);

        assert!(conn.terminate(CloseReason::GoingAway, "bye"));
        assert!(!conn.terminate(CloseReason::Normal, "again"));
        conn.terminated().await;

        match rx.recv().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, GOING_AWAY);
                assert_ne!(frame.code, NORMAL);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(conn.send_text(Utf8Bytes::from_static("{}")).is_err());
    }
}
