//! Conversation and message data model.
//!
//! Field names serialize in camelCase so persisted snapshots keep the
//! layout front ends already read (`lastUpdated`, `isSpeaking`, ...).

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Conversation identifier.
pub type ConversationId = String;

/// Message identifier.
pub type MessageId = String;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The human user.
    User,
    /// The assistant.
    Bot,
}

/// User rating of a bot message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    /// No rating.
    #[default]
    None,
    /// Thumbs up.
    Like,
    /// Thumbs down.
    Dislike,
}

impl Feedback {
    fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Origin of a grounding citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroundingSource {
    /// Web search result.
    Web,
    /// Maps place result.
    Maps,
}

/// A source reference supplied alongside generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingChunk {
    /// Where the citation came from.
    pub source: GroundingSource,
    /// Link to the source. Identity for de-duplication.
    pub uri: String,
    /// Display title.
    pub title: String,
}

/// Append `incoming` citations not already present (by uri), keeping first-seen order.
///
/// Returns the number of entries appended.
pub fn merge_grounding(existing: &mut Vec<GroundingChunk>, incoming: &[GroundingChunk]) -> usize {
    let mut appended = 0;
    for chunk in incoming {
        if !existing.iter().any(|c| c.uri == chunk.uri) {
            existing.push(chunk.clone());
            appended += 1;
        }
    }
    appended
}

/// An in-band tool invocation attached to a bot message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Function name announced by the model.
    pub name: String,
    /// Arguments supplied by the model.
    #[serde(default)]
    pub args: serde_json::Value,
    /// `true` while the side effect is running and no result exists yet.
    pub thinking: bool,
    /// Result payload once the side effect completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ToolCall {
    /// A freshly announced, unresolved call.
    pub fn pending(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
            thinking: true,
            result: None,
        }
    }

    /// Attach a result, ending the pending state.
    pub fn resolved(mut self, result: serde_json::Value) -> Self {
        self.thinking = false;
        self.result = Some(result);
        self
    }

    /// Whether the call has a result and can be replayed as call/response.
    pub fn is_resolved(&self) -> bool {
        !self.thinking && self.result.is_some()
    }
}

/// A single conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID.
    pub id: MessageId,
    /// Author.
    pub sender: Sender,
    /// Display text. For bot messages, always the full accumulated text.
    pub text: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Attached or generated image, as a `data:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Attached audio recording, as a `data:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Whether speech playback for this message is pending or in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_speaking: Option<bool>,
    /// Whether the user stopped generation of this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_cancelled: Option<bool>,
    /// User rating.
    #[serde(default, skip_serializing_if = "Feedback::is_none")]
    pub feedback: Feedback,
    /// Citations, in first-seen order, unique by uri.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grounding_chunks: Vec<GroundingChunk>,
    /// Active or resolved tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
}

impl Message {
    /// A user message with the given text.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text.into())
    }

    /// An empty bot placeholder.
    pub fn bot_placeholder() -> Self {
        Self::new(Sender::Bot, String::new())
    }

    fn new(sender: Sender, text: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            text,
            timestamp: Utc::now(),
            image_url: None,
            audio_url: None,
            is_speaking: None,
            is_cancelled: None,
            feedback: Feedback::None,
            grounding_chunks: Vec::new(),
            tool_call: None,
        }
    }

    /// Attach an image `data:` URL.
    pub fn with_image(mut self, data_url: impl Into<String>) -> Self {
        self.image_url = Some(data_url.into());
        self
    }

    /// Attach an audio `data:` URL.
    pub fn with_audio(mut self, data_url: impl Into<String>) -> Self {
        self.audio_url = Some(data_url.into());
        self
    }

    /// Merge a partial update into this message.
    pub fn apply(&mut self, patch: MessagePatch) {
        if let Some(text) = patch.text {
            self.text = text;
        }
        if let Some(image_url) = patch.image_url {
            self.image_url = image_url;
        }
        if let Some(audio_url) = patch.audio_url {
            self.audio_url = audio_url;
        }
        if let Some(speaking) = patch.is_speaking {
            self.is_speaking = Some(speaking);
        }
        if let Some(cancelled) = patch.is_cancelled {
            self.is_cancelled = Some(cancelled);
        }
        if let Some(feedback) = patch.feedback {
            self.feedback = feedback;
        }
        if !patch.grounding.is_empty() {
            merge_grounding(&mut self.grounding_chunks, &patch.grounding);
        }
        if let Some(tool_call) = patch.tool_call {
            self.tool_call = tool_call;
        }
    }
}

/// A partial message update. Unset fields are left untouched.
///
/// `grounding` is merged append-only by uri rather than replacing the list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    /// Replace the text.
    pub text: Option<String>,
    /// Set (`Some(Some)`) or clear (`Some(None)`) the image.
    pub image_url: Option<Option<String>>,
    /// Set or clear the audio.
    pub audio_url: Option<Option<String>>,
    /// Set the speaking flag.
    pub is_speaking: Option<bool>,
    /// Set the cancelled flag.
    pub is_cancelled: Option<bool>,
    /// Set the feedback.
    pub feedback: Option<Feedback>,
    /// Citations to merge.
    pub grounding: Vec<GroundingChunk>,
    /// Set or clear the tool call.
    pub tool_call: Option<Option<ToolCall>>,
}

impl MessagePatch {
    /// Replace the text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set the image.
    pub fn image(mut self, data_url: impl Into<String>) -> Self {
        self.image_url = Some(Some(data_url.into()));
        self
    }

    /// Set the speaking flag.
    pub fn speaking(mut self, speaking: bool) -> Self {
        self.is_speaking = Some(speaking);
        self
    }

    /// Mark cancelled.
    pub fn cancelled(mut self) -> Self {
        self.is_cancelled = Some(true);
        self
    }

    /// Set the feedback.
    pub fn feedback(mut self, feedback: Feedback) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Merge citations.
    pub fn grounding(mut self, chunks: Vec<GroundingChunk>) -> Self {
        self.grounding = chunks;
        self
    }

    /// Set the tool call.
    pub fn tool_call(mut self, call: ToolCall) -> Self {
        self.tool_call = Some(Some(call));
        self
    }

    /// Clear the tool call.
    pub fn clear_tool_call(mut self) -> Self {
        self.tool_call = Some(None);
        self
    }
}

/// An ordered chat thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique ID: creation millis plus a random suffix.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Messages in chronological order.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Time of the most recent mutation.
    pub last_updated: DateTime<Utc>,
}

impl Conversation {
    /// An empty conversation with a fresh ID.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: generate_conversation_id(),
            title: title.into(),
            messages: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Refresh `last_updated`.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Find a message by ID.
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Apply a patch to a message. Returns `false` if the ID is unknown.
    pub(crate) fn patch_message(&mut self, id: &str, patch: MessagePatch) -> bool {
        match self.message_mut(id) {
            Some(message) => {
                message.apply(patch);
                true
            }
            None => false,
        }
    }
}

/// Format: `conv_{unix_millis}_{random_hex}`.
fn generate_conversation_id() -> ConversationId {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().r#gen();
    format!("conv_{millis}_{suffix:08x}")
}
