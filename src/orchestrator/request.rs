//! Turn input and request assembly.

use crate::conversation::{Message, build_history};
use crate::gateway::StreamRequest;
use crate::gateway::wire::{Content, InlineData, LatLng, Part, WireRole};
use crate::i18n::Strings;

/// What the user sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnInput {
    /// Typed text. May be empty for image- or audio-only input.
    pub text: String,
    /// Attached image.
    pub image: Option<InlineData>,
    /// Recorded audio.
    pub audio: Option<InlineData>,
}

impl TurnInput {
    /// Text-only input.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Attach an image.
    pub fn with_image(mut self, image: InlineData) -> Self {
        self.image = Some(image);
        self
    }

    /// Attach recorded audio.
    pub fn with_audio(mut self, audio: InlineData) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none() && self.audio.is_none()
    }

    /// The user message recorded for this input.
    pub fn to_message(&self) -> Message {
        let mut message = Message::user(self.text.clone());
        if let Some(image) = &self.image {
            message = message.with_image(image.to_data_url());
        }
        if let Some(audio) = &self.audio {
            message = message.with_audio(audio.to_data_url());
        }
        message
    }

    /// The `user` block for this input.
    ///
    /// Audio input carries the transcription instruction after the audio part.
    pub fn to_content(&self, strings: &Strings) -> Content {
        let mut parts = Vec::new();
        if let Some(image) = &self.image {
            parts.push(Part::InlineData(image.clone()));
        }
        if let Some(audio) = &self.audio {
            parts.push(Part::InlineData(audio.clone()));
            parts.push(Part::Text(strings.audio_instruction.to_owned()));
        }
        if !self.text.is_empty() {
            parts.push(Part::Text(self.text.clone()));
        }
        Content::new(WireRole::User, parts)
    }
}

/// A single device coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceLocation {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
}

impl From<DeviceLocation> for LatLng {
    fn from(location: DeviceLocation) -> Self {
        Self {
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

/// Speech output settings for a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceOptions {
    /// Speak the reply when the turn completes.
    pub enabled: bool,
    /// Voice identity passed to the synthesizer.
    pub voice_id: String,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            voice_id: "Kore".to_owned(),
        }
    }
}

/// Per-turn options supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOptions {
    /// Speech output.
    pub voice: VoiceOptions,
    /// Whether map-grounded retrieval is enabled.
    pub map_grounding: bool,
    /// Current device location, if permission was granted.
    pub location: Option<DeviceLocation>,
}

impl TurnOptions {
    /// Location bias to attach, if map grounding is on and a location is known.
    pub fn location_bias(&self) -> Option<LatLng> {
        self.map_grounding
            .then_some(self.location)
            .flatten()
            .map(LatLng::from)
    }
}

/// Assemble the chat request: prior history, then the new input.
pub fn build_stream_request(
    prior: &[Message],
    input: &TurnInput,
    options: &TurnOptions,
    system_instruction: &str,
    strings: &Strings,
) -> StreamRequest {
    let mut contents = build_history(prior);
    contents.push(input.to_content(strings));
    StreamRequest {
        contents,
        system_instruction: system_instruction.to_owned(),
        location_bias: options.location_bias(),
    }
}
