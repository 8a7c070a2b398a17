//! Configuration types for relay video chat

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Which video chat provider to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoChatKind {
    /// Publish/subscribe sessions against the media relay
    #[default]
    Verse,
    /// Video chat turned off; attaching media does nothing
    Disabled,
}

/// Relay connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerseConfig {
    /// Media relay signaling URL (ws:// or wss://)
    pub relay_url: String,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// How long to wait for the relay's `join` answer (default: 10000ms)
    pub join_timeout_ms: u64,

    /// Upper bound on ICE gathering before a local description is used (default: 5000ms)
    pub ice_gathering_timeout_ms: u64,

    /// Provider variant (default: verse)
    pub video_chat: VideoChatKind,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl FromStr for TurnServerConfig {
    type Err = Error;

    /// Parse `turn:host:port:username:credential`
    fn from_str(spec: &str) -> Result<Self> {
        let mut parts = spec.rsplitn(3, ':');
        let credential = parts.next().unwrap_or_default();
        let username = parts.next().unwrap_or_default();
        let url = parts.next().unwrap_or_default();

        if url.is_empty() || username.is_empty() || credential.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "TURN server must look like turn:host:port:username:credential, got '{}'",
                spec
            )));
        }

        let turn = TurnServerConfig {
            url: url.to_string(),
            username: username.to_string(),
            credential: credential.to_string(),
        };
        turn.validate()?;
        Ok(turn)
    }
}

impl TurnServerConfig {
    fn validate(&self) -> Result<()> {
        if !self.url.starts_with("turn:") && !self.url.starts_with("turns:") {
            return Err(Error::InvalidConfig(format!(
                "TURN server url must start with turn: or turns:, got {}",
                self.url
            )));
        }
        Ok(())
    }
}

impl Default for VerseConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:7000/ws".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            join_timeout_ms: 10_000,
            ice_gathering_timeout_ms: 5_000,
            video_chat: VideoChatKind::Verse,
        }
    }
}

impl VerseConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: VerseConfig = toml::from_str(source)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `relay_url` is not a valid WebSocket URL
    /// - a STUN or TURN url has the wrong scheme
    /// - `join_timeout_ms` or `ice_gathering_timeout_ms` is zero
    pub fn validate(&self) -> Result<()> {
        if self.video_chat == VideoChatKind::Disabled {
            return Ok(());
        }

        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server url must start with stun: or stuns:, got {}",
                bad
            )));
        }

        for turn in &self.turn_servers {
            turn.validate()?;
        }

        if self.join_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "join_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.ice_gathering_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "ice_gathering_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gathering_timeout_ms)
    }
}
