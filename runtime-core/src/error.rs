//! Error types for passage-core

use thiserror::Error;

/// Result type alias for passage-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for passage-core
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Channel send or connect failure
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// WebSocket handshake or protocol failure
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A bounded wait elapsed
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// The owning engine or channel was closed
    #[error("Closed: {0}")]
    Closed(String),

    /// Participant directory error
    #[error("Directory error: {0}")]
    DirectoryError(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ChannelError(_)
                | Error::WebSocketError(_)
                | Error::OperationTimeout(_)
                | Error::Io(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
