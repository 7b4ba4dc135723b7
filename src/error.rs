//! Error types for the concierge core.

use crate::gateway::GatewayError;
use crate::speech::SpeechError;
use crate::storage::StorageError;

/// Top-level error type for the chat core.
#[derive(Debug, thiserror::Error)]
pub enum ConciergeError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Remote generative backend error.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Persistent key/value storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Speech synthesis or playback error.
    #[error("speech error: {0}")]
    Speech(#[from] SpeechError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ConciergeError>;
