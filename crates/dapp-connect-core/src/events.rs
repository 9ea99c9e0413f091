//! Callback lists that replace ad-hoc `on`/`emit`/`removeListener` wiring.
//!
//! Every connector reports through one [`ConnectorEvent`] enum; the
//! connection manager re-publishes what it observed as [`ConnectionEvent`]s.

use std::sync::{Arc, Mutex, Weak};

use alloy::primitives::Address;

use crate::domain::{ChainId, ConnectionDescriptor};

/// Acquire mutex lock, recovering from poisoned state if necessary.
macro_rules! lock_or_recover {
    ($mutex:expr) => {
        match $mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("listener list mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    ChainChanged(ChainId),
    AccountChanged(Option<Address>),
    /// The transport died or the remote peer disconnected.
    SessionEnded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(ConnectionDescriptor),
    ChainChanged(ConnectionDescriptor),
    AccountChanged(Option<Address>),
    Disconnected,
}

pub type EventListener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E> {
    next_id: u64,
    entries: Vec<(u64, EventListener<E>)>,
}

pub struct EventEmitter<E> {
    inner: Arc<Mutex<Listeners<E>>>,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<E> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> std::fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E: 'static> EventEmitter<E> {
    pub fn subscribe(&self, listener: EventListener<E>) -> Subscription {
        let id = {
            let mut g = lock_or_recover!(self.inner);
            g.next_id = g.next_id.saturating_add(1);
            let id = g.next_id;
            g.entries.push((id, listener));
            id
        };
        let weak: Weak<Mutex<Listeners<E>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock_or_recover!(inner).entries.retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Listeners run outside the lock, so they may subscribe or unsubscribe.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<EventListener<E>> = lock_or_recover!(self.inner)
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn clear(&self) {
        lock_or_recover!(self.inner).entries.clear();
    }
}

impl<E> EventEmitter<E> {
    pub fn listener_count(&self) -> usize {
        lock_or_recover!(self.inner).entries.len()
    }
}

/// Removes its listener when dropped.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to undo.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
