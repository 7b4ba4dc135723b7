//! Decoding of synthesized speech.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::SpeechError;

/// Mono f32 samples at a fixed rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Playback length of the buffer.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = (self.samples.len() as u64).saturating_mul(1_000_000_000);
        Duration::from_nanos(nanos / u64::from(self.sample_rate))
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decode base64 16-bit little-endian mono PCM into an [`AudioBuffer`].
///
/// A trailing odd byte is ignored.
///
/// # Errors
///
/// Returns [`SpeechError::Decode`] if the payload is not valid base64.
pub fn decode_pcm16_base64(encoded: &str, sample_rate: u32) -> Result<AudioBuffer, SpeechError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SpeechError::Decode(format!("invalid base64 audio: {e}")))?;
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();
    Ok(AudioBuffer {
        samples,
        sample_rate,
    })
}
