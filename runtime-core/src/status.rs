//! Connection status tracking with broadcast-on-change

use crate::delegate::Delegate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Initial state; cannot be re-entered
    #[default]
    Unconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
    Failed,
}

impl ConnectionState {
    /// `Closed` and `Failed` end a connection attempt
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Finite-state tracker that broadcasts every applied transition
///
/// A transition fires the matching per-state delegate first, then
/// [`on_status_change`](Self::on_status_change) with the new state.
/// Setting the current state again is silent, and `Unconnected` is
/// rejected once left (it is also the initial state, so it is never applied).
///
/// `set_status` is meant to be driven by a single owner; the internal lock
/// only keeps concurrent readers consistent.
#[derive(Debug, Default)]
pub struct ConnectionStatus {
    current: Mutex<ConnectionState>,
    pub on_connecting: Delegate<()>,
    pub on_connected: Delegate<()>,
    pub on_reconnecting: Delegate<()>,
    pub on_closed: Delegate<()>,
    pub on_failed: Delegate<()>,
    pub on_status_change: Delegate<ConnectionState>,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn status(&self) -> ConnectionState {
        *self.current.lock()
    }

    /// Apply a transition; returns true when the state changed
    pub fn set_status(&self, new_state: ConnectionState) -> bool {
        {
            let mut current = self.current.lock();
            if *current == new_state {
                return false;
            }
            if new_state == ConnectionState::Unconnected {
                warn!(
                    "Cannot set connection status back to unconnected (current: {})",
                    *current
                );
                return false;
            }
            debug!("Connection status {} -> {}", *current, new_state);
            *current = new_state;
        }

        let per_state = match new_state {
            ConnectionState::Connecting => &self.on_connecting,
            ConnectionState::Connected => &self.on_connected,
            ConnectionState::Reconnecting => &self.on_reconnecting,
            ConnectionState::Closed => &self.on_closed,
            ConnectionState::Failed => &self.on_failed,
            ConnectionState::Unconnected => return false,
        };
        per_state.broadcast(&());
        self.on_status_change.broadcast(&new_state);
        true
    }
}
