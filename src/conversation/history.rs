//! Conversation history to wire-format content blocks.
//!
//! A pure fold over the message list; no network or store access.
//!
//! - user message → `user` block: inline image part (if any), inline audio
//!   part (if any), then text (if any)
//! - bot message → `model` text block (if non-empty)
//! - resolved tool call on a bot message → `model` function-call block
//!   immediately followed by a `tool` function-response block
//!
//! A message contributing no parts contributes no block, so empty bot
//! placeholders never reach the backend.

use super::types::{Message, Sender};
use crate::gateway::wire::{Content, FunctionCall, FunctionResponse, InlineData, Part, WireRole};

/// Fold `messages` into request history.
pub fn build_history(messages: &[Message]) -> Vec<Content> {
    messages.iter().fold(Vec::new(), |mut contents, message| {
        match message.sender {
            Sender::User => {
                let mut parts = Vec::new();
                let attachments = [message.image_url.as_deref(), message.audio_url.as_deref()];
                for data in attachments
                    .into_iter()
                    .flatten()
                    .filter_map(InlineData::from_data_url)
                {
                    parts.push(Part::InlineData(data));
                }
                if !message.text.is_empty() {
                    parts.push(Part::Text(message.text.clone()));
                }
                if !parts.is_empty() {
                    contents.push(Content::new(WireRole::User, parts));
                }
            }
            Sender::Bot => {
                if !message.text.is_empty() {
                    contents.push(Content::new(
                        WireRole::Model,
                        vec![Part::Text(message.text.clone())],
                    ));
                }
                if let Some(call) = message.tool_call.as_ref().filter(|c| c.is_resolved()) {
                    contents.push(Content::new(
                        WireRole::Model,
                        vec![Part::FunctionCall(FunctionCall {
                            name: call.name.clone(),
                            args: call.args.clone(),
                        })],
                    ));
                    contents.push(Content::new(
                        WireRole::Tool,
                        vec![Part::FunctionResponse(FunctionResponse {
                            name: call.name.clone(),
                            response: call.result.clone().unwrap_or_default(),
                        })],
                    ));
                }
            }
        }
        contents
    })
}
