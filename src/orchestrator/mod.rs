//! Turn orchestration: one user input in, one streamed bot reply out.
//!
//! [`TurnOrchestrator`] drives a turn through [`TurnState`]:
//!
//! 1. **Building**: read the target conversation, fold its history into
//!    request content, append the user message and an empty bot placeholder.
//! 2. **Streaming**: consume the gateway's chunk stream, writing the full
//!    accumulated text into the bot message after every delta.
//! 3. **ToolPending**: a function call was announced; service it (image
//!    synthesis) before consuming further chunks.
//! 4. **Finalizing**: on normal completion, title the conversation if this
//!    was its first turn and speak the reply if voice output is enabled.
//!
//! Only one turn streams at a time. [`TurnOrchestrator::stop_generating`]
//! fires the turn's cancellation token; the consuming loop stops before the
//! next chunk and the reply is marked cancelled. Every mutation is routed
//! through the [`ConversationStore`], so persisted state is always the state
//! the UI renders.

pub mod request;
pub mod state;
pub mod title;
pub mod tools;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conversation::{
    Conversation, ConversationId, ConversationStore, Feedback, Message, MessageId, MessagePatch,
    Sender, ToolCall,
};
use crate::gateway::{GatewayError, GenerativeGateway, StreamChunk, StreamRequest};
use crate::i18n::{Language, Strings};
use crate::settings::BotSettings;
use crate::speech::PlaybackCoordinator;

pub use request::{DeviceLocation, TurnInput, TurnOptions, VoiceOptions, build_stream_request};
pub use state::TurnState;
pub use tools::ToolResolution;

/// Why a turn did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Another turn is streaming.
    Busy,
    /// The input had no text, image or audio.
    EmptyInput,
    /// The target conversation no longer exists.
    UnknownConversation,
    /// The message to edit is not a user message of the active conversation.
    UnknownMessage,
}

/// Identifiers of the messages a turn created.
#[derive(Debug)]
pub struct TurnReport {
    /// Conversation the turn ran in.
    pub conversation_id: ConversationId,
    /// The user message.
    pub user_message_id: MessageId,
    /// The bot reply.
    pub bot_message_id: MessageId,
    /// Background title generation, spawned after a first turn completes.
    pub title_task: Option<JoinHandle<()>>,
}

/// Result of [`TurnOrchestrator::send_message`].
#[derive(Debug)]
pub enum TurnOutcome {
    /// The turn never started.
    Rejected(RejectReason),
    /// The stream completed and side effects ran.
    Completed(TurnReport),
    /// The user stopped the turn.
    Cancelled(TurnReport),
    /// The turn failed; the bot message carries the error text.
    Failed(TurnReport),
}

impl TurnOutcome {
    /// Report of a turn that started.
    pub fn report(&self) -> Option<&TurnReport> {
        match self {
            Self::Rejected(_) => None,
            Self::Completed(r) | Self::Cancelled(r) | Self::Failed(r) => Some(r),
        }
    }

    /// Take the report out of a turn that started.
    pub fn into_report(self) -> Option<TurnReport> {
        match self {
            Self::Rejected(_) => None,
            Self::Completed(r) | Self::Cancelled(r) | Self::Failed(r) => Some(r),
        }
    }
}

struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
}

/// Holds the single-flight slot. Dropping it frees the slot.
struct TurnGuard<'a> {
    orchestrator: &'a TurnOrchestrator,
    id: u64,
    released: bool,
}

impl TurnGuard<'_> {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.orchestrator.release(self.id);
        }
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.release();
            self.orchestrator.settle();
        }
    }
}

/// Counts a turn as finalizing until dropped, then settles the state.
struct FinalizingGuard<'a> {
    orchestrator: &'a TurnOrchestrator,
}

impl<'a> FinalizingGuard<'a> {
    fn enter(orchestrator: &'a TurnOrchestrator) -> Self {
        orchestrator.finalizing.fetch_add(1, Ordering::SeqCst);
        Self { orchestrator }
    }
}

impl Drop for FinalizingGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.finalizing.fetch_sub(1, Ordering::SeqCst);
        self.orchestrator.settle();
    }
}

enum StreamEnd {
    Completed,
    Cancelled,
    Failed(GatewayError),
}

/// Text accumulated for the bot message during one turn.
#[derive(Debug, Default)]
struct ReplyBuffer {
    text: String,
    tool_pending: bool,
}

impl ReplyBuffer {
    /// Append a notice paragraph (apology, stop marker, error).
    fn append_notice(&mut self, notice: &str) {
        if !self.text.is_empty() {
            self.text.push_str("\n\n");
        }
        self.text.push_str(notice);
    }
}

/// Turn state machine over a store, a gateway and an optional speech output.
pub struct TurnOrchestrator {
    store: Arc<ConversationStore>,
    gateway: Arc<dyn GenerativeGateway>,
    speech: Option<Arc<PlaybackCoordinator>>,
    settings: Arc<BotSettings>,
    language: Mutex<Language>,
    active: Mutex<Option<ActiveTurn>>,
    next_turn: AtomicU64,
    /// Turns that released the slot but are still titling or speaking.
    finalizing: AtomicUsize,
    state: watch::Sender<TurnState>,
}

impl std::fmt::Debug for TurnOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnOrchestrator")
            .field("state", &*self.state.borrow())
            .field("speech", &self.speech.is_some())
            .finish()
    }
}

impl TurnOrchestrator {
    /// Create an orchestrator without speech output.
    pub fn new(
        store: Arc<ConversationStore>,
        gateway: Arc<dyn GenerativeGateway>,
        settings: BotSettings,
    ) -> Self {
        let (state, _) = watch::channel(TurnState::Idle);
        Self {
            store,
            gateway,
            speech: None,
            settings: Arc::new(settings),
            language: Mutex::new(Language::default()),
            active: Mutex::new(None),
            next_turn: AtomicU64::new(1),
            finalizing: AtomicUsize::new(0),
            state,
        }
    }

    /// Attach a playback coordinator for spoken replies.
    pub fn with_speech(mut self, speech: Arc<PlaybackCoordinator>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Set the language used for markers and error text.
    pub fn with_language(self, language: Language) -> Self {
        self.set_language(language);
        self
    }

    /// Change the language for subsequent turns.
    pub fn set_language(&self, language: Language) {
        *self
            .language
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = language;
    }

    fn strings(&self) -> &'static Strings {
        self.language
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .strings()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Bot settings in use.
    pub fn settings(&self) -> &BotSettings {
        &self.settings
    }

    /// All conversations, most recently active first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.store.conversations_by_recency()
    }

    /// The active conversation.
    pub fn active_conversation(&self) -> Option<Conversation> {
        self.store.active_conversation()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }

    /// Current turn state.
    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    /// Whether a reply is being produced.
    pub fn is_loading(&self) -> bool {
        self.state().is_loading()
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveTurn>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: TurnState) {
        debug!(state = %state, "turn state");
        self.state.send_replace(state);
    }

    fn begin(&self) -> Option<(TurnGuard<'_>, CancellationToken)> {
        let mut active = self.lock_active();
        if active.is_some() {
            return None;
        }
        let id = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *active = Some(ActiveTurn {
            id,
            cancel: cancel.clone(),
        });
        Some((
            TurnGuard {
                orchestrator: self,
                id,
                released: false,
            },
            cancel,
        ))
    }

    fn release(&self, id: u64) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|turn| turn.id == id) {
            *active = None;
        }
    }

    /// Publish `Idle` unless another turn has taken the slot or is still
    /// finalizing.
    fn settle(&self) {
        let active = self.lock_active();
        if active.is_none() && self.finalizing.load(Ordering::SeqCst) == 0 {
            self.set_state(TurnState::Idle);
        }
    }

    /// Run a turn in the active conversation.
    ///
    /// Returns [`TurnOutcome::Rejected`] without touching any state if a
    /// turn is already streaming or the input is empty.
    pub async fn send_message(&self, input: TurnInput, options: &TurnOptions) -> TurnOutcome {
        if input.is_empty() {
            debug!("ignoring empty input");
            return TurnOutcome::Rejected(RejectReason::EmptyInput);
        }
        let Some((guard, cancel)) = self.begin() else {
            warn!("turn rejected: another turn is in progress");
            return TurnOutcome::Rejected(RejectReason::Busy);
        };
        let conversation_id = match self.store.active_conversation() {
            Some(conversation) => conversation.id,
            None => self.store.create_conversation().id,
        };
        self.run_turn(guard, cancel, conversation_id, input, options)
            .await
    }

    /// Replace a past user message and everything after it with a new turn.
    ///
    /// The single-flight slot is taken before anything is truncated, so a
    /// rejected edit leaves history untouched.
    pub async fn edit_and_resend(
        &self,
        message_id: &str,
        new_text: &str,
        options: &TurnOptions,
    ) -> TurnOutcome {
        let input = TurnInput::text(new_text);
        if input.is_empty() {
            return TurnOutcome::Rejected(RejectReason::EmptyInput);
        }
        let Some((guard, cancel)) = self.begin() else {
            warn!("edit rejected: another turn is in progress");
            return TurnOutcome::Rejected(RejectReason::Busy);
        };
        let Some(conversation) = self.store.active_conversation() else {
            return TurnOutcome::Rejected(RejectReason::UnknownConversation);
        };
        let editable = conversation
            .message(message_id)
            .is_some_and(|m| m.sender == Sender::User);
        if !editable {
            warn!(message_id, "edit rejected: not a user message of the active conversation");
            return TurnOutcome::Rejected(RejectReason::UnknownMessage);
        }

        let removed = self.store.truncate_after(&conversation.id, message_id);
        info!(
            conversation_id = %conversation.id,
            removed = removed.unwrap_or_default(),
            "editing message and resending"
        );
        self.run_turn(guard, cancel, conversation.id, input, options)
            .await
    }

    /// Cancel the streaming turn, if any. Repeated calls have no further effect.
    pub fn stop_generating(&self) -> bool {
        let active = self.lock_active();
        match active.as_ref() {
            Some(turn) => {
                if !turn.cancel.is_cancelled() {
                    info!(turn = turn.id, "stopping generation");
                    turn.cancel.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Stop queued and playing speech.
    pub fn stop_speaking(&self) {
        if let Some(speech) = &self.speech {
            speech.stop();
        }
    }

    /// Rate a message. Repeating the current rating clears it.
    pub fn record_feedback(
        &self,
        conversation_id: &str,
        message_id: &str,
        feedback: Feedback,
    ) -> Option<Feedback> {
        self.store.set_feedback(conversation_id, message_id, feedback)
    }

    /// Drive one turn from `Building` to a terminal state.
    ///
    /// The single-flight slot is released on entering `Finalizing`, so a new
    /// turn may stream while this reply is still spoken. `Idle` is published
    /// only once no turn holds the slot and none is still finalizing.
    async fn run_turn(
        &self,
        mut guard: TurnGuard<'_>,
        cancel: CancellationToken,
        conversation_id: ConversationId,
        input: TurnInput,
        options: &TurnOptions,
    ) -> TurnOutcome {
        self.set_state(TurnState::Building);
        let strings = self.strings();

        let Some(conversation) = self.store.conversation(&conversation_id) else {
            warn!(conversation_id = %conversation_id, "turn target no longer exists");
            return TurnOutcome::Rejected(RejectReason::UnknownConversation);
        };
        let first_turn = conversation.messages.is_empty();
        let request = build_stream_request(
            &conversation.messages,
            &input,
            options,
            self.settings.system_instruction(),
            strings,
        );

        let user = input.to_message();
        let bot = Message::bot_placeholder();
        let mut report = TurnReport {
            conversation_id: conversation_id.clone(),
            user_message_id: user.id.clone(),
            bot_message_id: bot.id.clone(),
            title_task: None,
        };
        if !self.store.append_turn(&conversation_id, user, bot) {
            warn!(conversation_id = %conversation_id, "turn target vanished before append");
            return TurnOutcome::Rejected(RejectReason::UnknownConversation);
        }
        info!(
            conversation_id = %conversation_id,
            history = request.contents.len() - 1,
            first_turn,
            "turn started"
        );

        let mut reply = ReplyBuffer::default();
        let end = self
            .stream_reply(&cancel, request, &report, &input.text, strings, &mut reply)
            .await;

        match end {
            StreamEnd::Completed => {}
            StreamEnd::Cancelled => {
                self.set_state(TurnState::Cancelled);
                reply.append_notice(strings.response_stopped);
                let mut patch = MessagePatch::default().text(reply.text.clone()).cancelled();
                if reply.tool_pending {
                    patch = patch.clear_tool_call();
                }
                self.update(&report, patch);
                info!(conversation_id = %conversation_id, "turn cancelled");
                return TurnOutcome::Cancelled(report);
            }
            StreamEnd::Failed(e) => {
                error!(
                    conversation_id = %conversation_id,
                    code = e.code(),
                    error = %e,
                    "turn failed"
                );
                reply.append_notice(strings.turn_failed);
                let mut patch = MessagePatch::default().text(reply.text.clone());
                if reply.tool_pending {
                    patch = patch.clear_tool_call();
                }
                self.update(&report, patch);
                return TurnOutcome::Failed(report);
            }
        }

        self.set_state(TurnState::Finalizing);
        let finalizing = FinalizingGuard::enter(self);
        guard.release();
        info!(conversation_id = %conversation_id, chars = reply.text.len(), "turn completed");

        if first_turn {
            report.title_task = Some(tokio::spawn(title::generate_title(
                Arc::clone(&self.gateway),
                Arc::clone(&self.store),
                conversation_id.clone(),
                title::title_prompt(&input.text, &reply.text),
            )));
        }

        if options.voice.enabled && !reply.text.trim().is_empty() {
            self.speak(&options.voice, &reply.text, &report).await;
        }

        drop(finalizing);
        TurnOutcome::Completed(report)
    }

    async fn stream_reply(
        &self,
        cancel: &CancellationToken,
        request: StreamRequest,
        report: &TurnReport,
        fallback_prompt: &str,
        strings: &Strings,
        reply: &mut ReplyBuffer,
    ) -> StreamEnd {
        self.set_state(TurnState::Streaming);

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return StreamEnd::Cancelled,
            opened = self.gateway.generate_stream(request, cancel.clone()) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return StreamEnd::Failed(e),
        };

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return StreamEnd::Cancelled,
                next = stream.next() => next,
            };
            let chunk = match next {
                None => return StreamEnd::Completed,
                Some(Err(e)) => return StreamEnd::Failed(e),
                Some(Ok(chunk)) => chunk,
            };
            if let Some(end) = self
                .apply_chunk(cancel, chunk, report, fallback_prompt, strings, reply)
                .await
            {
                return end;
            }
        }
    }

    /// Apply one chunk to the bot message. Returns early only on cancellation.
    async fn apply_chunk(
        &self,
        cancel: &CancellationToken,
        chunk: StreamChunk,
        report: &TurnReport,
        fallback_prompt: &str,
        strings: &Strings,
        reply: &mut ReplyBuffer,
    ) -> Option<StreamEnd> {
        match chunk {
            StreamChunk::TextDelta { text } => {
                reply.text.push_str(&text);
                self.update(report, MessagePatch::default().text(reply.text.clone()));
            }
            StreamChunk::FunctionCall { name, args } => {
                self.set_state(TurnState::ToolPending);
                reply.tool_pending = true;
                debug!(tool = %name, "function call announced");
                self.update(
                    report,
                    MessagePatch::default()
                        .tool_call(ToolCall::pending(name.clone(), args.clone())),
                );

                let resolution = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Some(StreamEnd::Cancelled),
                    resolution = tools::run_tool(
                        self.gateway.as_ref(),
                        &name,
                        &args,
                        fallback_prompt,
                    ) => resolution,
                };
                reply.tool_pending = false;

                match resolution {
                    ToolResolution::Resolved { result, image } => {
                        let mut patch = MessagePatch::default()
                            .tool_call(ToolCall::pending(name, args).resolved(result));
                        if let Some(image) = image {
                            patch = patch.image(image.to_data_url());
                        }
                        self.update(report, patch);
                    }
                    ToolResolution::Failed => {
                        warn!(tool = %name, "function call failed, continuing with text");
                        reply.append_notice(strings.image_failed);
                        self.update(
                            report,
                            MessagePatch::default()
                                .clear_tool_call()
                                .text(reply.text.clone()),
                        );
                    }
                }
                self.set_state(TurnState::Streaming);
            }
            StreamChunk::InlineMedia { data } => {
                reply.tool_pending = false;
                self.update(
                    report,
                    MessagePatch::default()
                        .image(data.to_data_url())
                        .clear_tool_call(),
                );
            }
            StreamChunk::Citations { chunks } => {
                self.update(report, MessagePatch::default().grounding(chunks));
            }
        }
        None
    }

    async fn speak(&self, voice: &VoiceOptions, text: &str, report: &TurnReport) {
        let Some(speech) = &self.speech else {
            debug!("voice output requested but no speech output is attached");
            return;
        };
        self.update(report, MessagePatch::default().speaking(true));
        if let Err(e) = speech
            .enqueue_and_play(
                text,
                &voice.voice_id,
                &report.conversation_id,
                &report.bot_message_id,
            )
            .await
        {
            warn!(error = %e, "speech playback failed");
        }
    }

    fn update(&self, report: &TurnReport, patch: MessagePatch) {
        if !self
            .store
            .update_message(&report.conversation_id, &report.bot_message_id, patch)
        {
            debug!(
                conversation_id = %report.conversation_id,
                "bot message gone, dropping update"
            );
        }
    }
}
