//! Concierge: streaming conversation core for a hotel-booking chat assistant.
//!
//! The crate turns user input (text, image or recorded audio) into a
//! streamed reply from a generative backend, keeping a multi-conversation
//! history persisted and speaking replies on request.
//!
//! # Architecture
//!
//! - **Conversation store**: single owner of conversations and messages;
//!   persists after every mutation and broadcasts change events
//! - **Gateway**: one-shot, streaming and image generation behind a trait,
//!   decoded into typed chunks at the boundary
//! - **Turn orchestrator**: the per-turn state machine covering history fold,
//!   delta accumulation, tool calls, cancellation, titles, speech
//! - **Speech**: TTS synthesis and gapless playback scheduling
//!
//! ```text
//! input → TurnOrchestrator → GenerativeGateway ─chunks→ ConversationStore → UI
//!                        └─→ PlaybackCoordinator ─isSpeaking→ ConversationStore
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod i18n;
pub mod orchestrator;
pub mod settings;
pub mod speech;
pub mod storage;

pub use config::ConciergeConfig;
pub use conversation::{Conversation, ConversationStore, Message, StoreEvent};
pub use error::{ConciergeError, Result};
pub use gateway::{GatewayError, GenerativeGateway, StreamChunk};
pub use i18n::Language;
pub use orchestrator::{TurnInput, TurnOptions, TurnOrchestrator, TurnOutcome, TurnState};
pub use settings::BotSettings;
