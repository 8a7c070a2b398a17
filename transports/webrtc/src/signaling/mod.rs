//! Media relay signaling
//!
//! JSON-RPC messages exchanged with the relay, the negotiation state machine
//! and the connection that drives it.

pub mod connection;
pub mod negotiator;
pub mod protocol;

pub use connection::VerseConnection;
pub use negotiator::{Action, NegotiationEvent, Negotiator};
pub use protocol::{IceCandidate, SdpType, SessionDescription, SessionRole};
