//! Error types for wyoming-whisper-bridge.

use std::time::Duration;
use thiserror::Error;

/// Stable error codes sent to clients in `error` events.
pub mod codes {
    pub const PROTOCOL_VIOLATION: &str = "protocol_violation";
    pub const BACKEND_UNREACHABLE: &str = "backend_unreachable";
    pub const BACKEND_TIMEOUT: &str = "backend_timeout";
    pub const BACKEND_REJECTED: &str = "backend_rejected";
    pub const TRANSCRIPTION_FAILED: &str = "transcription_failed";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Error, Debug)]
pub enum BridgeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Front protocol errors
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Malformed event frame: {message}")]
    Framing { message: String },

    // Backend errors
    #[error("Transcription backend unreachable: {message}")]
    BackendUnreachable { message: String },

    #[error("Transcription backend timed out after {timeout:?}")]
    BackendTimeout { timeout: Duration },

    #[error("Transcription backend rejected request ({status}): {body}")]
    BackendRejected { status: u16, body: String },

    #[error("Unexpected transcription backend response: {message}")]
    BackendProtocolError { message: String },

    // Audio assembly errors
    #[error("Audio assembly failed: {message}")]
    Audio { message: String },

    // Transport errors
    #[error("Socket error: {message}")]
    Socket { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Error code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::ProtocolViolation { .. } | BridgeError::Framing { .. } => {
                codes::PROTOCOL_VIOLATION
            }
            BridgeError::BackendUnreachable { .. } => codes::BACKEND_UNREACHABLE,
            BridgeError::BackendTimeout { .. } => codes::BACKEND_TIMEOUT,
            BridgeError::BackendRejected { .. } => codes::BACKEND_REJECTED,
            BridgeError::BackendProtocolError { .. } | BridgeError::Audio { .. } => {
                codes::TRANSCRIPTION_FAILED
            }
            _ => codes::INTERNAL,
        }
    }

    /// Message reported to clients.
    ///
    /// Rejections carry the backend's status and body verbatim. Unexpected
    /// response shapes collapse into a generic message; the details go to the log.
    pub fn client_message(&self) -> String {
        match self {
            BridgeError::BackendProtocolError { .. } => "Transcription failed".to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn violation(message: impl Into<String>) -> Self {
        BridgeError::ProtocolViolation {
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, BridgeError>;
