//! WebRTC video chat for Passage
//!
//! Connects to a media relay over a JSON-RPC WebSocket channel and receives
//! a remote participant's audio and video.
//!
//! # Architecture
//!
//! ```text
//! VideoChatProvider (one per process)
//!   └─ VerseConnection (one per attached participant)
//!       ├─ JsonRpc over WebSocketChannel  → relay: join / answer / trickle
//!       ├─ Negotiator (pure state machine)
//!       ├─ publish PeerSession   (data channel only, sends the join offer)
//!       └─ subscribe PeerSession (answers relay offers, receives tracks)
//!            ↓ RTP payloads
//!          MediaSinks (decoder → VideoSink / AudioPlayout)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use passage_core::directory::Participant;
//! use passage_webrtc::{create_video_chat, MediaSinks, VerseConfig};
//!
//! # async fn example() -> passage_webrtc::Result<()> {
//! let config = VerseConfig {
//!     relay_url: "wss://relay.example.com/ws".to_string(),
//!     ..Default::default()
//! };
//! let provider = create_video_chat(&config)?;
//!
//! let mut participant = Participant::new("remote-1");
//! participant.server_location = "10.0.0.7".to_string();
//! provider.attach_media(&participant, MediaSinks::default()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod provider;
pub mod signaling;

pub use config::{TurnServerConfig, VerseConfig, VideoChatKind};
pub use error::{Error, Result};
pub use media::{AudioPlayout, DecodedMedia, MediaDecoder, MediaSinks, VideoFrame, VideoSink};
pub use peer::{PeerEvent, PeerSession, PeerSessionFactory, PeerState, TrackKind};
pub use provider::{create_video_chat, DisabledVideoChat, VerseVideoChat, VideoChatProvider};
pub use signaling::{SessionDescription, SessionRole, VerseConnection};
