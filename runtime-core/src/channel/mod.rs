//! Bidirectional text-message transports
//!
//! A [`Channel`] carries opaque text frames. The RPC engine binds to one and
//! never looks past this contract, so the same engine runs over a real
//! socket ([`WebSocketChannel`]), an in-process loopback ([`PairedChannel`]),
//! or either of those wrapped in a keep-alive decorator ([`HeartbeatChannel`]).

mod heartbeat;
mod paired;
mod websocket;

pub use heartbeat::{HeartbeatChannel, HEARTBEAT_MESSAGE};
pub use paired::PairedChannel;
pub use websocket::WebSocketChannel;

use crate::delegate::Delegate;
use crate::Result;

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint is going away
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Bidirectional text transport
pub trait Channel: Send + Sync {
    /// Send one text frame
    fn send(&self, message: &str) -> Result<()>;

    /// Close the transport with a status code and reason
    fn close(&self, code: u16, reason: &str);

    /// Fires once per inbound text frame, in arrival order
    fn on_message(&self) -> &Delegate<String>;
}
