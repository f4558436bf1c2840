//! Typed observers for inbound frames and connection lifecycle.
//!
//! Handlers are keyed by [`MessageKind`] or [`LifecycleEvent`] rather than
//! by free-form strings. Registering returns an [`ObserverHandle`]; dropping
//! the handle removes the handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use super::messages::{Envelope, MessageKind};

/// Handler for inbound frames.
pub type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Handler for lifecycle transitions.
pub type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;

/// Connection lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// First successful connection.
    Connect,
    /// Transport lost.
    Disconnect,
    /// Connection re-established after a loss.
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Message(MessageKind),
    Lifecycle(LifecycleEvent),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    messages: HashMap<MessageKind, Vec<(u64, MessageHandler)>>,
    lifecycle: HashMap<LifecycleEvent, Vec<(u64, LifecycleHandler)>>,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    fn remove(&mut self, slot: Slot, id: u64) {
        match slot {
            Slot::Message(kind) => {
                if let Some(handlers) = self.messages.get_mut(&kind) {
                    handlers.retain(|(hid, _)| *hid != id);
                    if handlers.is_empty() {
                        self.messages.remove(&kind);
                    }
                }
            }
            Slot::Lifecycle(event) => {
                if let Some(handlers) = self.lifecycle.get_mut(&event) {
                    handlers.retain(|(hid, _)| *hid != id);
                    if handlers.is_empty() {
                        self.lifecycle.remove(&event);
                    }
                }
            }
        }
    }
}

/// Observer table shared between the connection manager and its reader task.
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<RwLock<Registry>>,
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Observers")
            .field("message_kinds", &registry.messages.len())
            .field("lifecycle_events", &registry.lifecycle.len())
            .finish()
    }
}

impl Observers {
    /// Creates an empty observer table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one frame kind.
    #[must_use = "dropping the handle unsubscribes the handler"]
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F) -> ObserverHandle
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let mut registry = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id();
        registry
            .messages
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        self.handle(Slot::Message(kind), id)
    }

    /// Registers a handler for a lifecycle transition.
    #[must_use = "dropping the handle unsubscribes the handler"]
    pub fn on<F>(&self, event: LifecycleEvent, handler: F) -> ObserverHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut registry = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id();
        registry
            .lifecycle
            .entry(event)
            .or_default()
            .push((id, Arc::new(handler)));
        self.handle(Slot::Lifecycle(event), id)
    }

    fn handle(&self, slot: Slot, id: u64) -> ObserverHandle {
        ObserverHandle {
            registry: Arc::downgrade(&self.inner),
            slot,
            id,
        }
    }

    /// Delivers a frame to every handler for its kind.
    ///
    /// Handlers run outside the table lock, so they may register or drop
    /// observers. Returns the number of handlers invoked.
    pub fn emit(&self, envelope: &Envelope) -> usize {
        let handlers: Vec<MessageHandler> = {
            let registry = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .messages
                .get(&envelope.kind)
                .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(envelope);
        }
        handlers.len()
    }

    /// Notifies lifecycle handlers.
    pub fn emit_lifecycle(&self, event: LifecycleEvent) -> usize {
        let handlers: Vec<LifecycleHandler> = {
            let registry = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .lifecycle
                .get(&event)
                .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler();
        }
        handlers.len()
    }

    /// Returns the number of handlers registered for a frame kind.
    #[must_use]
    pub fn count(&self, kind: MessageKind) -> usize {
        let registry = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        registry.messages.get(&kind).map_or(0, Vec::len)
    }

    /// Returns the total number of registered handlers.
    #[must_use]
    pub fn total(&self) -> usize {
        let registry = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        registry.messages.values().map(Vec::len).sum::<usize>()
            + registry.lifecycle.values().map(Vec::len).sum::<usize>()
    }
}

/// Registration token. Dropping it removes the handler.
pub struct ObserverHandle {
    registry: Weak<RwLock<Registry>>,
    slot: Slot,
    id: u64,
}

impl ObserverHandle {
    /// Removes the handler now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("slot", &self.slot)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(self.slot, self.id);
        }
    }
}
