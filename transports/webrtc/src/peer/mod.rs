//! Peer sessions
//!
//! A [`PeerSession`] is one peer connection in a fixed [`SessionRole`]. The
//! signaling driver only talks to this trait; [`WebRtcSessionFactory`] backs
//! it with webrtc-rs, tests back it with scripted mocks.

pub mod connection;

pub use connection::{WebRtcSession, WebRtcSessionFactory};

use crate::signaling::protocol::{IceCandidate, SessionDescription, SessionRole};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Label of the data channel the publish session opens before its offer
pub const PUBLISH_DATA_CHANNEL: &str = "dummy-data";

/// Peer connection state as reported by the media stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Kind of an inbound media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Notifications a session pushes to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    StateChanged(SessionRole, PeerState),
    TrackAdded(SessionRole, TrackKind),
}

/// One peer connection
#[async_trait]
pub trait PeerSession: Send + Sync {
    fn role(&self) -> SessionRole;

    async fn create_data_channel(&self, label: &str) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer to the remote offer already applied
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    ///
    /// Returns once the description is applied; implementations that gather
    /// ICE candidates may wait (bounded) for gathering to finish.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// The currently applied local description, including gathered candidates
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates the sessions for one relay connection
#[async_trait]
pub trait PeerSessionFactory: Send + Sync {
    async fn create(
        &self,
        role: SessionRole,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerSession>>;
}
