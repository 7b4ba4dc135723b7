//! Remote streaming gateway to the generative backend.
//!
//! Adapters normalize the backend's streaming payloads into [`StreamChunk`]s.
//! Wire framing and JSON decoding stay behind this boundary; consumers only
//! ever match on the typed chunk.
//!
//! # Chunk stream lifecycle
//!
//! ```text
//! TextDelta* (FunctionCall | InlineMedia | Citations | TextDelta)* <end>
//! ```
//!
//! A stream is finite and not restartable. Each chunk carries exactly one
//! unit of new information; a backend payload holding text and citations
//! becomes two chunks.
//!
//! # Submodules
//!
//! - [`sse`]: byte-level event framing
//! - [`wire`]: request content blocks
//! - [`gemini`]: HTTP adapter

pub mod gemini;
pub mod sse;
pub mod wire;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::conversation::GroundingChunk;
use wire::{Content, InlineData, LatLng};

pub use gemini::GeminiGateway;

/// Stable error codes for programmatic handling.
pub mod error_codes {
    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    /// Authentication failed (invalid/missing API key).
    pub const AUTH_FAILED: &str = "AUTH_FAILED";
    /// The request could not be sent or was rejected as malformed.
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";
    /// The stream broke after it started.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";
    /// The backend returned an error status.
    pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";
    /// A response body could not be decoded.
    pub const DECODE_FAILED: &str = "DECODE_FAILED";
}

/// Errors produced by the gateway.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Authentication failed.
    #[error("[{}] {}", error_codes::AUTH_FAILED, .0)]
    Auth(String),

    /// The request could not be sent.
    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    Request(String),

    /// The stream broke mid-flight.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    Stream(String),

    /// The backend returned an error status.
    #[error("[{}] {}", error_codes::PROVIDER_ERROR, .0)]
    Provider(String),

    /// A response body could not be decoded.
    #[error("[{}] {}", error_codes::DECODE_FAILED, .0)]
    Decode(String),
}

impl GatewayError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Auth(_) => error_codes::AUTH_FAILED,
            Self::Request(_) => error_codes::REQUEST_FAILED,
            Self::Stream(_) => error_codes::STREAM_FAILED,
            Self::Provider(_) => error_codes::PROVIDER_ERROR,
            Self::Decode(_) => error_codes::DECODE_FAILED,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Config(m)
            | Self::Auth(m)
            | Self::Request(m)
            | Self::Stream(m)
            | Self::Provider(m)
            | Self::Decode(m) => m,
        }
    }

    /// Whether a fresh request may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Auth(_) | Self::Decode(_) => false,
            Self::Request(_) | Self::Stream(_) | Self::Provider(_) => true,
        }
    }
}

/// Name of the in-band image synthesis tool declared to the model.
pub const GENERATE_IMAGE_TOOL: &str = "generate_image";

/// One normalized unit of streamed output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A fragment of generated text.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// The model announced a function call.
    FunctionCall {
        /// Function name.
        name: String,
        /// JSON arguments.
        args: serde_json::Value,
    },
    /// Generated media (e.g. an image) delivered inline.
    InlineMedia {
        /// The media payload.
        data: InlineData,
    },
    /// A batch of grounding citations.
    Citations {
        /// Citations in backend order.
        chunks: Vec<GroundingChunk>,
    },
}

/// Everything the gateway needs to open a chat stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Ordered history plus the new input.
    pub contents: Vec<Content>,
    /// System instruction, attached unmodified.
    pub system_instruction: String,
    /// Location bias for map-grounded retrieval. `None` = maps retrieval off.
    pub location_bias: Option<LatLng>,
}

/// A boxed, finite stream of chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, GatewayError>> + Send>>;

/// Contract of the generative backend as seen by the orchestrator.
#[async_trait]
pub trait GenerativeGateway: Send + Sync {
    /// Single request/response text generation (used for titles).
    async fn generate_once(&self, prompt: &str) -> Result<String, GatewayError>;

    /// Open a chat stream.
    ///
    /// Cancelling `cancel` ends the stream and drops the transport.
    async fn generate_stream(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, GatewayError>;

    /// Synthesize an image. Failures are logged and yield `None`.
    async fn generate_image(&self, prompt: &str) -> Option<InlineData>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_prefix() {
        let err = GatewayError::Auth("expired key".into());
        let display = err.to_string();
        assert!(display.starts_with("[AUTH_FAILED]"));
        assert!(display.contains("expired key"));
        assert_eq!(err.message(), "expired key");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(GatewayError::Config("x".into()).code(), "CONFIG_INVALID");
        assert_eq!(GatewayError::Request("x".into()).code(), "REQUEST_FAILED");
        assert_eq!(GatewayError::Stream("x".into()).code(), "STREAM_FAILED");
        assert_eq!(GatewayError::Provider("x".into()).code(), "PROVIDER_ERROR");
        assert_eq!(GatewayError::Decode("x".into()).code(), "DECODE_FAILED");
    }

    #[test]
    fn retryability() {
        assert!(!GatewayError::Auth("x".into()).is_retryable());
        assert!(!GatewayError::Config("x".into()).is_retryable());
        assert!(GatewayError::Stream("x".into()).is_retryable());
        assert!(GatewayError::Provider("x".into()).is_retryable());
    }
}
