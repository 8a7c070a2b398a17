//! Configuration types for passage-core
//!
//! Loaded from TOML:
//!
//! ```toml
//! [directory]
//! kind = "remote"
//! url = "wss://directory.example.com/ws"
//! token = "…"
//! heartbeat_interval_ms = 5000
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which participant directory to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryKind {
    /// Offline roster with a generated local participant
    #[default]
    Standalone,
    /// Roster mirrored from a directory service over WebSocket
    Remote,
}

/// Participant directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Provider variant (default: standalone)
    pub kind: DirectoryKind,

    /// Directory service URL (ws:// or wss://), required for `remote`
    pub url: String,

    /// Bearer token sent with the upgrade request
    pub token: Option<String>,

    /// Idle time before a heartbeat is sent (default: 5000ms)
    pub heartbeat_interval_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            kind: DirectoryKind::Standalone,
            url: String::new(),
            token: None,
            heartbeat_interval_ms: 5_000,
        }
    }
}

impl DirectoryConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.kind == DirectoryKind::Remote
            && !self.url.starts_with("ws://")
            && !self.url.starts_with("wss://")
        {
            return Err(Error::InvalidConfig(format!(
                "directory.url must start with ws:// or wss://, got '{}'",
                self.url
            )));
        }

        if self.heartbeat_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "directory.heartbeat_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration; `RUST_LOG` takes precedence over `level`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name: trace, debug, info, warn or error (default: "info")
    pub level: String,

    /// Output format (default: text)
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if !crate::logging::is_valid_level(&self.level) {
            return Err(Error::InvalidConfig(format!(
                "logging.level must be one of trace, debug, info, warn, error; got '{}'",
                self.level
            )));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PassageConfig {
    pub directory: DirectoryConfig,
    pub logging: LoggingConfig,
}

impl PassageConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: PassageConfig = toml::from_str(source)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        self.directory.validate()?;
        self.logging.validate()
    }
}
