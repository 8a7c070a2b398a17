//! Video chat providers
//!
//! A [`VideoChatProvider`] maps participants to media connections. The
//! variant is picked once from configuration by [`create_video_chat`].

use crate::config::{VerseConfig, VideoChatKind};
use crate::media::MediaSinks;
use crate::peer::{PeerSessionFactory, WebRtcSessionFactory};
use crate::signaling::VerseConnection;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use passage_core::channel::Channel;
use passage_core::directory::Participant;
use passage_core::{ConnectionState, ConnectionStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Builds the session factory for one participant's sinks
pub type SessionFactoryBuilder =
    Arc<dyn Fn(MediaSinks) -> Arc<dyn PeerSessionFactory> + Send + Sync>;

/// Media for remote participants
#[async_trait]
pub trait VideoChatProvider: Send + Sync {
    /// Availability of the underlying service
    fn status(&self) -> &ConnectionStatus;

    /// Start receiving `participant`'s media into `sinks`
    ///
    /// Media may start flowing much later than this returns.
    async fn attach_media(&self, participant: &Participant, sinks: MediaSinks) -> Result<()>;

    /// Stop receiving media for a participant; false if nothing was attached
    fn detach_media(&self, participant_id: &str) -> bool;

    /// The live connection for a participant, if any
    fn connection(&self, participant_id: &str) -> Option<Arc<VerseConnection>>;
}

/// Room id for a participant on a given server
pub fn channel_name(participant: &Participant) -> String {
    format!("{}/{}", participant.server_location, participant.id)
}

/// One relay connection per attached participant
pub struct VerseVideoChat {
    config: VerseConfig,
    sessions: SessionFactoryBuilder,
    connections: Mutex<HashMap<String, Arc<VerseConnection>>>,
    status: ConnectionStatus,
}

impl VerseVideoChat {
    pub fn new(config: VerseConfig) -> Self {
        let session_config = config.clone();
        let sessions: SessionFactoryBuilder = Arc::new(move |sinks| {
            Arc::new(WebRtcSessionFactory::new(session_config.clone(), sinks))
                as Arc<dyn PeerSessionFactory>
        });
        Self::with_session_factory(config, sessions)
    }

    /// Use a custom peer-session factory per participant
    pub fn with_session_factory(config: VerseConfig, sessions: SessionFactoryBuilder) -> Self {
        let status = ConnectionStatus::new();
        status.set_status(ConnectionState::Connected);
        Self {
            config,
            sessions,
            connections: Mutex::new(HashMap::new()),
            status,
        }
    }

    /// Attach over an already open signaling channel instead of the relay URL
    pub fn attach_over(
        &self,
        participant: &Participant,
        sinks: MediaSinks,
        channel: Arc<dyn Channel>,
    ) -> Result<Arc<VerseConnection>> {
        let connection = self.replace_connection(participant, sinks);
        connection.connect_over(channel, &channel_name(participant))?;
        Ok(connection)
    }

    /// Number of attached participants
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    fn replace_connection(&self, participant: &Participant, sinks: MediaSinks) -> Arc<VerseConnection> {
        let connection = Arc::new(VerseConnection::new(
            (self.sessions)(sinks),
            self.config.join_timeout(),
        ));
        let previous = self
            .connections
            .lock()
            .insert(participant.id.clone(), Arc::clone(&connection));
        if let Some(previous) = previous {
            debug!("Replacing media connection for {}", participant.id);
            previous.close();
        }
        connection
    }
}

#[async_trait]
impl VideoChatProvider for VerseVideoChat {
    fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    async fn attach_media(&self, participant: &Participant, sinks: MediaSinks) -> Result<()> {
        if self.config.relay_url.is_empty() {
            error!("Relay URL is empty, unable to connect to the video server");
            return Err(Error::InvalidConfig("relay_url is empty".to_string()));
        }

        let connection = self.replace_connection(participant, sinks);
        let sid = channel_name(participant);
        info!("Connecting to '{}' with sid '{}'", self.config.relay_url, sid);
        connection.connect(&self.config.relay_url, &sid).await
    }

    fn detach_media(&self, participant_id: &str) -> bool {
        match self.connections.lock().remove(participant_id) {
            Some(connection) => {
                connection.close();
                true
            }
            None => {
                error!("Cannot detach media. No record of media for participant {}", participant_id);
                false
            }
        }
    }

    fn connection(&self, participant_id: &str) -> Option<Arc<VerseConnection>> {
        self.connections.lock().get(participant_id).cloned()
    }
}

impl Drop for VerseVideoChat {
    fn drop(&mut self) {
        for (_, connection) in self.connections.lock().drain() {
            connection.close();
        }
    }
}

/// Provider used when video chat is turned off
pub struct DisabledVideoChat {
    status: ConnectionStatus,
}

impl DisabledVideoChat {
    pub fn new() -> Self {
        let status = ConnectionStatus::new();
        status.set_status(ConnectionState::Closed);
        Self { status }
    }
}

impl Default for DisabledVideoChat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoChatProvider for DisabledVideoChat {
    fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    async fn attach_media(&self, participant: &Participant, _sinks: MediaSinks) -> Result<()> {
        debug!("Video chat disabled, not attaching media for {}", participant.id);
        Ok(())
    }

    fn detach_media(&self, _participant_id: &str) -> bool {
        false
    }

    fn connection(&self, _participant_id: &str) -> Option<Arc<VerseConnection>> {
        None
    }
}

/// Build the provider selected by `config.video_chat`
pub fn create_video_chat(config: &VerseConfig) -> Result<Arc<dyn VideoChatProvider>> {
    config.validate()?;
    Ok(match config.video_chat {
        VideoChatKind::Verse => Arc::new(VerseVideoChat::new(config.clone())),
        VideoChatKind::Disabled => Arc::new(DisabledVideoChat::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn participant(id: &str, server: &str) -> Participant {
        let mut participant = Participant::new(id);
        participant.server_location = server.to_string();
        participant
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_name(&participant("abc", "10.0.0.7")), "10.0.0.7/abc");
    }

    #[test]
    fn test_factory_selects_variant() {
        let verse = assert_ok!(create_video_chat(&VerseConfig::default()));
        assert_eq!(verse.status().status(), ConnectionState::Connected);

        let disabled = assert_ok!(create_video_chat(&VerseConfig {
            video_chat: VideoChatKind::Disabled,
            ..Default::default()
        }));
        assert_eq!(disabled.status().status(), ConnectionState::Closed);
    }

    #[test]
    fn test_factory_rejects_invalid_config() {
        let result = create_video_chat(&VerseConfig {
            relay_url: "relay".to_string(),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_is_inert() {
        let provider = DisabledVideoChat::new();
        assert_ok!(
            provider
                .attach_media(&participant("p", "s"), MediaSinks::default())
                .await
        );
        assert!(provider.connection("p").is_none());
        assert!(!provider.detach_media("p"));
    }

    #[tokio::test]
    async fn test_detach_unknown_participant() {
        let provider = VerseVideoChat::new(VerseConfig::default());
        assert!(!provider.detach_media("nobody"));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_attach_with_empty_url_fails() {
        let provider = VerseVideoChat::new(VerseConfig {
            relay_url: String::new(),
            ..Default::default()
        });
        let result = provider
            .attach_media(&participant("p", "s"), MediaSinks::default())
            .await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert!(provider.connection("p").is_none());
    }
}
