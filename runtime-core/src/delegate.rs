//! Multicast callback lists
//!
//! Every event in this crate (inbound channel messages, RPC notifies, status
//! changes, roster updates) is a [`Delegate`]. Listeners are `Fn(&T)` closures
//! shared behind an `Arc`, so a broadcast snapshots the list and calls each
//! listener with the lock released. Listeners may therefore add or remove
//! listeners, including themselves, while being invoked.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Token returned by [`Delegate::add`], used to remove the listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelegateHandle(u64);

/// Thread-safe multicast delegate
pub struct Delegate<T> {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(DelegateHandle, Listener<T>)>>,
}

impl<T> Delegate<T> {
    /// Create a delegate with no listeners
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener
    pub fn add<F>(&self, listener: F) -> DelegateHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let handle = DelegateHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((handle, Arc::new(listener)));
        handle
    }

    /// Remove a listener; returns false if it was not registered
    pub fn remove(&self, handle: DelegateHandle) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        listeners.len() != before
    }

    /// Invoke every listener with `value`, in registration order
    pub fn broadcast(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(value);
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// True when nobody is listening
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl<T> Default for Delegate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Delegate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegate")
            .field("listeners", &self.len())
            .finish()
    }
}
