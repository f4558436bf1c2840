//! Keyed clear timers and the liveness token.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Shared flag that stops handlers from touching state after disposal.
#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl Liveness {
    /// Creates a live token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false once revoked.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Revokes the token for every clone. Returns true on the first call.
    pub fn revoke(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }
}

/// One pending clear per key.
///
/// Scheduling a key aborts its previous timer. Callbacks should still check
/// a generation number, since an abort cannot recall a callback that has
/// already started running.
#[derive(Debug)]
pub struct ClearTimers<K> {
    pending: HashMap<K, JoinHandle<()>>,
}

impl<K> Default for ClearTimers<K> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> ClearTimers<K> {
    /// Creates an empty timer set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `clear` after `after`, replacing any timer pending for `key`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F>(&mut self, key: K, after: Duration, clear: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.retain(|_, handle| !handle.is_finished());
        let deadline = tokio::time::Instant::now() + after;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            clear();
        });
        if let Some(previous) = self.pending.insert(key, handle) {
            previous.abort();
        }
    }

    /// Cancels the timer for `key`, if any.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }

    /// Number of timers that have not fired yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.values().filter(|h| !h.is_finished()).count()
    }
}

impl<K> Drop for ClearTimers<K> {
    fn drop(&mut self) {
        for handle in self.pending.values() {
            handle.abort();
        }
    }
}
