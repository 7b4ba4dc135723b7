//! Conversation state: data model, store, and history reconstruction.
//!
//! # Submodules
//!
//! - [`types`]: [`Conversation`], [`Message`], [`MessagePatch`] and friends
//! - [`store`]: [`ConversationStore`], the single owner of conversation state
//! - [`history`]: pure fold from messages to wire-format content blocks

pub mod history;
pub mod store;
pub mod types;

pub use history::build_history;
pub use store::{ConversationStore, StoreEvent, StoreSnapshot};
pub use types::{
    Conversation, ConversationId, Feedback, GroundingChunk, GroundingSource, Message, MessageId,
    MessagePatch, Sender, ToolCall, merge_grounding,
};
