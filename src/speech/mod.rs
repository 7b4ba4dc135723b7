//! Text-to-speech synthesis and gapless playback.
//!
//! - [`tts`]: remote synthesis client (`(text, voice) -> base64 PCM`)
//! - [`pcm`]: base64 16-bit PCM decode
//! - [`output`]: playback sinks behind the [`AudioOutput`] trait
//! - [`playback`]: [`PlaybackCoordinator`], queueing buffers against a shared clock

pub mod output;
pub mod pcm;
pub mod playback;
pub mod tts;

pub use output::{AudioOutput, TimedOutput, WavRecorder};
pub use pcm::{AudioBuffer, decode_pcm16_base64};
pub use playback::PlaybackCoordinator;
pub use tts::{GeminiSpeech, SpeechSynthesizer};

/// Speech pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// The synthesis request failed.
    #[error("TTS request failed: {0}")]
    Request(String),

    /// The synthesis response could not be decoded.
    #[error("TTS decode failed: {0}")]
    Decode(String),

    /// The audio output failed.
    #[error("audio output error: {0}")]
    Audio(String),
}
