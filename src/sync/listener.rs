//! Typed subscription registry with per-listener failure isolation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::document::ClientDocument;
use crate::error::SyncError;
use crate::transport::ConnectionState;

/// Receives patch and connection events. A returned error or a panic is logged and
/// does not prevent delivery to the listeners registered after this one.
pub trait SyncListener<C>: Send + Sync {
    fn on_patch_applied(&self, document: &ClientDocument<C>) -> anyhow::Result<()>;

    fn on_connection_state(&self, _state: ConnectionState) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_connection_error(&self, _error: &SyncError) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub struct ListenerRegistry<C> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn SyncListener<C>>)>>,
}

impl<C> Default for ListenerRegistry<C> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<C> ListenerRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn SyncListener<C>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Returns the number of listeners that failed.
    pub fn notify_patch(&self, document: &ClientDocument<C>) -> usize {
        self.fan_out("patch", |listener| listener.on_patch_applied(document))
    }

    pub fn notify_state(&self, state: ConnectionState) -> usize {
        self.fan_out("connection state", |listener| {
            listener.on_connection_state(state)
        })
    }

    pub fn notify_error(&self, error: &SyncError) -> usize {
        self.fan_out("connection error", |listener| {
            listener.on_connection_error(error)
        })
    }

    fn fan_out<F>(&self, event: &str, deliver: F) -> usize
    where
        F: Fn(&dyn SyncListener<C>) -> anyhow::Result<()>,
    {
        // Snapshot so listeners can (un)subscribe while being notified
        let snapshot: Vec<_> = self.listeners.read().clone();
        let mut failures = 0;

        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| deliver(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    tracing::warn!(subscription = ?id, "listener failed on {event} event: {err:#}");
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!(subscription = ?id, "listener panicked on {event} event");
                }
            }
        }

        failures
    }
}
