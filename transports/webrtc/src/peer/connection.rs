//! webrtc-rs peer sessions

use super::{PeerEvent, PeerSession, PeerSessionFactory, PeerState, TrackKind};
use crate::config::VerseConfig;
use crate::media::MediaSinks;
use crate::signaling::protocol::{IceCandidate, SdpType, SessionDescription, SessionRole};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Builds [`WebRtcSession`]s from relay configuration
///
/// Inbound media on subscribe sessions is decoded and delivered to `sinks`.
pub struct WebRtcSessionFactory {
    config: VerseConfig,
    sinks: MediaSinks,
}

impl WebRtcSessionFactory {
    pub fn new(config: VerseConfig, sinks: MediaSinks) -> Self {
        Self { config, sinks }
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(self.config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect()
    }
}

#[async_trait]
impl PeerSessionFactory for WebRtcSessionFactory {
    #[instrument(skip(self, events))]
    async fn create(
        &self,
        role: SessionRole,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerSession>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptors = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptors)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                if let Some(state) = peer_state(s) {
                    let _ = state_events.send(PeerEvent::StateChanged(role, state));
                }
                Box::pin(async {})
            },
        ));

        if role == SessionRole::Subscribe {
            let sinks = self.sinks.clone();
            peer_connection.on_track(Box::new(
                move |track: Arc<TrackRemote>,
                      _receiver: Arc<RTCRtpReceiver>,
                      _transceiver: Arc<RTCRtpTransceiver>| {
                    if let Some(kind) = track_kind(track.kind()) {
                        info!("Remote {} track added on {} session", kind, role);
                        let _ = events.send(PeerEvent::TrackAdded(role, kind));
                        tokio::spawn(read_track(track, kind, sinks.clone()));
                    }
                    Box::pin(async {})
                },
            ));
        }

        info!("Created {} peer session", role);
        Ok(Arc::new(WebRtcSession {
            role,
            peer_connection,
            gathering_timeout: self.config.ice_gathering_timeout(),
        }))
    }
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerState::New),
        RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerState::Closed),
        _ => None,
    }
}

fn track_kind(codec_type: RTPCodecType) -> Option<TrackKind> {
    match codec_type {
        RTPCodecType::Audio => Some(TrackKind::Audio),
        RTPCodecType::Video => Some(TrackKind::Video),
        _ => None,
    }
}

/// Forward RTP payloads from one remote track until it ends
async fn read_track(track: Arc<TrackRemote>, kind: TrackKind, sinks: MediaSinks) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => sinks.handle_payload(kind, &packet.payload),
            Err(e) => {
                debug!("{} track reader stopped: {}", kind, e);
                break;
            }
        }
    }
}

/// One webrtc-rs peer connection
pub struct WebRtcSession {
    role: SessionRole,
    peer_connection: Arc<RTCPeerConnection>,
    gathering_timeout: Duration,
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse session description: {}", e)))
}

fn from_rtc(desc: RTCSessionDescription) -> Option<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Some(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Some(SessionDescription::answer(desc.sdp)),
        _ => None,
    }
}

#[async_trait]
impl PeerSession for WebRtcSession {
    fn role(&self) -> SessionRole {
        self.role
    }

    async fn create_data_channel(&self, label: &str) -> Result<()> {
        self.peer_connection
            .create_data_channel(label, None)
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to create data channel: {}", e)))?;
        debug!("Created data channel '{}' on {} session", label, self.role);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let mut gathered = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        if tokio::time::timeout(self.gathering_timeout, gathered.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering on {} session did not finish within {:?}, using partial candidates",
                self.role, self.gathering_timeout
            );
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.peer_connection
            .local_description()
            .await
            .and_then(from_rtc)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: Some(candidate.sdp_mid),
            sdp_mline_index: Some(candidate.sdp_m_line_index),
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing {} peer session", self.role);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServerConfig;

    #[test]
    fn test_ice_servers_from_config() {
        let config = VerseConfig {
            turn_servers: vec![TurnServerConfig {
                url: "turn:relay.example.com:3478".to_string(),
                username: "u".to_string(),
                credential: "p".to_string(),
            }],
            ..Default::default()
        };
        let factory = WebRtcSessionFactory::new(config, MediaSinks::default());
        let servers = factory.ice_servers();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302".to_string()]);
        assert_eq!(servers[1].username, "u");
        assert_eq!(servers[1].credential, "p");
    }

    #[test]
    fn test_description_conversion() {
        assert!(matches!(
            to_rtc(SessionDescription::answer("v=0")).map(|d| d.sdp_type),
            Ok(RTCSdpType::Answer)
        ));
    }

    #[tokio::test]
    async fn test_publish_offer_round_trip() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = WebRtcSessionFactory::new(
            VerseConfig {
                stun_servers: Vec::new(),
                ice_gathering_timeout_ms: 500,
                ..Default::default()
            },
            MediaSinks::default(),
        );

        let session = factory.create(SessionRole::Publish, tx).await.unwrap();
        session.create_data_channel(crate::peer::PUBLISH_DATA_CHANNEL).await.unwrap();
        let offer = session.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("webrtc-datachannel"));

        session.set_local_description(offer).await.unwrap();
        let local = session.local_description().await.unwrap();
        assert_eq!(local.sdp_type, SdpType::Offer);

        session.close().await.unwrap();
    }
}
