//! Process-wide typed event bus
//!
//! Cross-cutting signals (restart requests, directory availability) are
//! keyed by [`GlobalEvent`] instead of free-form names, so a misspelt event
//! is a compile error rather than a silent no-op. One instance lives for the
//! duration of a session: [`EventBus::init`] at session start,
//! [`EventBus::teardown`] at the end.

use crate::delegate::{Delegate, DelegateHandle};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Events shared across otherwise unrelated components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalEvent {
    /// The participant directory reached `Connected`
    DirectoryConnected,
    /// The participant directory closed or failed
    DirectoryLost,
    /// Something asked for the session to be restarted
    RestartRequested,
    /// The video chat provider is ready to attach media
    VideoChatReady,
}

static GLOBAL: RwLock<Option<Arc<EventBus>>> = parking_lot::const_rwlock(None);

/// Publish/subscribe bus keyed by [`GlobalEvent`]
#[derive(Debug, Default)]
pub struct EventBus {
    delegates: RwLock<HashMap<GlobalEvent, Arc<Delegate<GlobalEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh process-wide bus, replacing any previous one
    pub fn init() -> Arc<EventBus> {
        let bus = Arc::new(EventBus::new());
        *GLOBAL.write() = Some(Arc::clone(&bus));
        debug!("Event bus initialised");
        bus
    }

    /// The process-wide bus, if a session has initialised one
    pub fn global() -> Option<Arc<EventBus>> {
        GLOBAL.read().clone()
    }

    /// Remove the process-wide bus; existing handles keep working
    pub fn teardown() {
        if GLOBAL.write().take().is_some() {
            debug!("Event bus torn down");
        }
    }

    fn delegate(&self, event: GlobalEvent) -> Arc<Delegate<GlobalEvent>> {
        if let Some(delegate) = self.delegates.read().get(&event) {
            return Arc::clone(delegate);
        }
        Arc::clone(self.delegates.write().entry(event).or_default())
    }

    /// Listen for `event`
    pub fn subscribe<F>(&self, event: GlobalEvent, listener: F) -> DelegateHandle
    where
        F: Fn(&GlobalEvent) + Send + Sync + 'static,
    {
        self.delegate(event).add(listener)
    }

    pub fn unsubscribe(&self, event: GlobalEvent, handle: DelegateHandle) -> bool {
        self.delegate(event).remove(handle)
    }

    /// Notify every listener of `event`
    pub fn broadcast(&self, event: GlobalEvent) {
        debug!("Broadcasting {:?}", event);
        self.delegate(event).broadcast(&event);
    }

    /// Broadcast on the process-wide bus if there is one
    pub fn broadcast_global(event: GlobalEvent) {
        if let Some(bus) = Self::global() {
            bus.broadcast(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_only_matching_listeners_fire() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.subscribe(GlobalEvent::RestartRequested, move |e| sink.lock().push(*e));
        let sink = Arc::clone(&seen);
        let handle = bus.subscribe(GlobalEvent::DirectoryLost, move |e| sink.lock().push(*e));

        bus.broadcast(GlobalEvent::RestartRequested);
        bus.broadcast(GlobalEvent::VideoChatReady);
        assert!(bus.unsubscribe(GlobalEvent::DirectoryLost, handle));
        bus.broadcast(GlobalEvent::DirectoryLost);

        assert_eq!(*seen.lock(), vec![GlobalEvent::RestartRequested]);
    }

    #[test]
    fn test_global_lifecycle() {
        let bus = EventBus::init();
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        bus.subscribe(GlobalEvent::DirectoryConnected, move |_| *counter.lock() += 1);

        EventBus::broadcast_global(GlobalEvent::DirectoryConnected);
        assert!(EventBus::global().is_some());

        EventBus::teardown();
        assert!(EventBus::global().is_none());
        EventBus::broadcast_global(GlobalEvent::DirectoryConnected);

        assert_eq!(*fired.lock(), 1);
    }
}
