//! Best-effort notification side effects.
//!
//! A desktop notification or a sound must never break the stream, so sink
//! errors are logged at debug level and dropped.

use thiserror::Error;
use tracing::{debug, info};

use crate::types::{Notification, Priority};

/// Failure reported by an [`AlertSink`].
#[derive(Debug, Error)]
pub enum AlertError {
    /// The platform refused or lacks the capability.
    #[error("alert sink unavailable: {0}")]
    Unavailable(String),

    /// The alert was attempted and failed.
    #[error("alert failed: {0}")]
    Failed(String),
}

/// Side effect fired for each incoming notification.
pub trait AlertSink: Send + Sync {
    /// Raises an alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert could not be raised. Callers ignore it.
    fn alert(&self, notification: &Notification) -> Result<(), AlertError>;
}

/// Logs notifications through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn alert(&self, notification: &Notification) -> Result<(), AlertError> {
        info!(
            id = %notification.id,
            priority = ?notification.priority,
            title = %notification.title,
            "notification"
        );
        Ok(())
    }
}

/// Forwards only notifications at or above a priority.
#[derive(Debug, Clone)]
pub struct MinPriority<S> {
    inner: S,
    threshold: Priority,
}

impl<S: AlertSink> MinPriority<S> {
    /// Wraps `inner`, forwarding notifications at `threshold` or higher.
    pub fn new(inner: S, threshold: Priority) -> Self {
        Self { inner, threshold }
    }
}

impl<S: AlertSink> AlertSink for MinPriority<S> {
    fn alert(&self, notification: &Notification) -> Result<(), AlertError> {
        if notification.priority < self.threshold {
            return Ok(());
        }
        self.inner.alert(notification)
    }
}

/// Fires `sink` and swallows its failure.
pub fn fire(sink: &dyn AlertSink, notification: &Notification) {
    if let Err(e) = sink.alert(notification) {
        debug!(id = %notification.id, error = %e, "alert dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NotificationKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing;

    impl AlertSink for Failing {
        fn alert(&self, _: &Notification) -> Result<(), AlertError> {
            Err(AlertError::Unavailable("no audio device".to_string()))
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl AlertSink for &Counting {
        fn alert(&self, _: &Notification) -> Result<(), AlertError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn note(priority: Priority) -> Notification {
        Notification::new("n1", "alice", NotificationKind::Order, "Filled", "order filled")
            .with_priority(priority)
    }

    #[test]
    fn test_fire_swallows_errors() {
        fire(&Failing, &note(Priority::High));
        fire(&LogAlerts, &note(Priority::Low));
    }

    #[test]
    fn test_min_priority_filters() {
        let counting = Counting::default();
        let sink = MinPriority::new(&counting, Priority::High);
        fire(&sink, &note(Priority::Low));
        fire(&sink, &note(Priority::High));
        fire(&sink, &note(Priority::Critical));
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }
}
