//! The conversation store: single owner of the conversation/message graph.
//!
//! Every mutation goes through a method on [`ConversationStore`], which
//! applies it under a lock, writes the full snapshot to the backing
//! [`KeyValueStore`], and then broadcasts a [`StoreEvent`]. Lookups that
//! miss (unknown conversation or message) are silent no-ops that return
//! `false`, so late updates racing a delete never panic.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::types::{Conversation, ConversationId, Feedback, Message, MessageId, MessagePatch};
use crate::storage::{KeyValueStore, load_json, save_json};

/// Key holding the serialized conversation array.
pub const CONVERSATIONS_KEY: &str = "conversations";

/// Key holding the active conversation ID.
pub const ACTIVE_CONVERSATION_KEY: &str = "active_conversation_id";

const EVENT_CAPACITY: usize = 256;

/// Change notification emitted after each persisted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Conversations were created, deleted, cleared, renamed or grew.
    ConversationsChanged,
    /// The active conversation changed.
    ActiveChanged {
        /// The new active conversation.
        conversation_id: ConversationId,
    },
    /// A single message was updated in place.
    MessageUpdated {
        /// Owning conversation.
        conversation_id: ConversationId,
        /// Updated message.
        message_id: MessageId,
    },
}

/// Serializable view of the whole store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// All conversations in storage order.
    pub conversations: Vec<Conversation>,
    /// The active conversation.
    pub active_id: ConversationId,
}

#[derive(Debug)]
struct StoreState {
    conversations: Vec<Conversation>,
    active_id: ConversationId,
}

impl StoreState {
    fn fresh(title: &str) -> Self {
        let conversation = Conversation::new(title);
        Self {
            active_id: conversation.id.clone(),
            conversations: vec![conversation],
        }
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    fn most_recent_id(&self) -> Option<ConversationId> {
        self.conversations
            .iter()
            .max_by_key(|c| c.last_updated)
            .map(|c| c.id.clone())
    }
}

/// Ordered collection of conversations plus the active selection.
pub struct ConversationStore {
    state: Mutex<StoreState>,
    backend: Arc<dyn KeyValueStore>,
    placeholder_title: String,
    events: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ConversationStore")
            .field("conversations", &state.conversations.len())
            .field("active_id", &state.active_id)
            .finish()
    }
}

impl ConversationStore {
    /// Recover the latest snapshot from `backend`.
    ///
    /// Missing, empty or unparseable snapshots are replaced by a single
    /// fresh conversation titled `placeholder_title`. An active ID that no
    /// longer resolves falls back to the most recently updated conversation.
    pub fn load(backend: Arc<dyn KeyValueStore>, placeholder_title: impl Into<String>) -> Self {
        let placeholder_title = placeholder_title.into();

        let loaded = load_json::<Vec<Conversation>>(backend.as_ref(), CONVERSATIONS_KEY);
        let conversations = match loaded {
            Ok(Some(list)) => list,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "discarding unreadable conversation snapshot");
                Vec::new()
            }
        };

        let state = if conversations.is_empty() {
            StoreState::fresh(&placeholder_title)
        } else {
            let stored_active = match load_json::<String>(backend.as_ref(), ACTIVE_CONVERSATION_KEY)
            {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "discarding unreadable active conversation id");
                    None
                }
            };
            let mut state = StoreState {
                conversations,
                active_id: String::new(),
            };
            state.active_id = match stored_active {
                Some(id) if state.conversations.iter().any(|c| c.id == id) => id,
                _ => state.most_recent_id().unwrap_or_default(),
            };
            state
        };

        info!(
            conversations = state.conversations.len(),
            active = %state.active_id,
            "conversation store loaded"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            state: Mutex::new(state),
            backend,
            placeholder_title,
            events,
        };
        {
            let state = store.lock();
            store.persist(&state);
        }
        store
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Title given to new conversations.
    pub fn placeholder_title(&self) -> &str {
        &self.placeholder_title
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &StoreState) {
        if let Err(e) = save_json(self.backend.as_ref(), CONVERSATIONS_KEY, &state.conversations) {
            error!(error = %e, "failed to persist conversations");
        }
        if let Err(e) = save_json(
            self.backend.as_ref(),
            ACTIVE_CONVERSATION_KEY,
            &state.active_id,
        ) {
            error!(error = %e, "failed to persist active conversation id");
        }
    }

    /// Apply `f` under the lock; when it reports a change, persist and notify.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Option<(R, Vec<StoreEvent>)>,
    ) -> Option<R> {
        let (result, events) = {
            let mut state = self.lock();
            let (result, events) = f(&mut state)?;
            self.persist(&state);
            (result, events)
        };
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        Some(result)
    }

    /// All conversations in storage (creation) order.
    pub fn list_conversations(&self) -> Vec<Conversation> {
        self.lock().conversations.clone()
    }

    /// All conversations, most recently updated first.
    pub fn conversations_by_recency(&self) -> Vec<Conversation> {
        let mut list = self.list_conversations();
        list.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        list
    }

    /// A copy of one conversation.
    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        self.lock().conversations.iter().find(|c| c.id == id).cloned()
    }

    /// The active conversation ID.
    pub fn active_id(&self) -> ConversationId {
        self.lock().active_id.clone()
    }

    /// A copy of the active conversation.
    pub fn active_conversation(&self) -> Option<Conversation> {
        let state = self.lock();
        state
            .conversations
            .iter()
            .find(|c| c.id == state.active_id)
            .cloned()
    }

    /// A copy of one message.
    pub fn message(&self, conversation_id: &str, message_id: &str) -> Option<Message> {
        self.lock()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .and_then(|c| c.message(message_id).cloned())
    }

    /// Full serializable state.
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.lock();
        StoreSnapshot {
            conversations: state.conversations.clone(),
            active_id: state.active_id.clone(),
        }
    }

    /// Create an empty conversation and make it active.
    pub fn create_conversation(&self) -> Conversation {
        let conversation = Conversation::new(self.placeholder_title.clone());
        let created = conversation.clone();
        self.mutate(move |state| {
            let id = conversation.id.clone();
            state.conversations.push(conversation);
            state.active_id = id.clone();
            Some((
                (),
                vec![
                    StoreEvent::ConversationsChanged,
                    StoreEvent::ActiveChanged { conversation_id: id },
                ],
            ))
        });
        debug!(conversation_id = %created.id, "conversation created");
        created
    }

    /// Make `id` the active conversation.
    pub fn select_conversation(&self, id: &str) -> bool {
        self.mutate(|state| {
            if state.active_id == id || !state.conversations.iter().any(|c| c.id == id) {
                return None;
            }
            state.active_id = id.to_owned();
            Some((
                (),
                vec![StoreEvent::ActiveChanged {
                    conversation_id: id.to_owned(),
                }],
            ))
        })
        .is_some()
    }

    /// Remove a conversation.
    ///
    /// Callers must have obtained user confirmation. Deleting the active
    /// conversation promotes the most recently updated remaining one, or a
    /// new empty conversation when none remain.
    pub fn delete_conversation(&self, id: &str) -> bool {
        let placeholder = self.placeholder_title.clone();
        self.mutate(|state| {
            let index = state.conversations.iter().position(|c| c.id == id)?;
            state.conversations.remove(index);
            let mut events = vec![StoreEvent::ConversationsChanged];
            if state.active_id == id {
                let next = match state.most_recent_id() {
                    Some(next) => next,
                    None => {
                        let fresh = Conversation::new(placeholder);
                        let fresh_id = fresh.id.clone();
                        state.conversations.push(fresh);
                        fresh_id
                    }
                };
                state.active_id = next.clone();
                events.push(StoreEvent::ActiveChanged { conversation_id: next });
            }
            Some(((), events))
        })
        .is_some()
    }

    /// Empty a conversation's messages, keeping its ID and title.
    pub fn clear_messages(&self, id: &str) -> bool {
        self.mutate(|state| {
            let conversation = state.find_mut(id)?;
            conversation.messages.clear();
            conversation.touch();
            Some(((), vec![StoreEvent::ConversationsChanged]))
        })
        .is_some()
    }

    /// Change a conversation's title.
    pub fn rename_conversation(&self, id: &str, title: impl Into<String>) -> bool {
        let title = title.into();
        self.mutate(|state| {
            let conversation = state.find_mut(id)?;
            conversation.title = title;
            conversation.touch();
            Some(((), vec![StoreEvent::ConversationsChanged]))
        })
        .is_some()
    }

    /// Append a user message and its bot placeholder as one mutation.
    ///
    /// Returns `false` (and changes nothing) if the conversation is gone.
    pub fn append_turn(&self, conversation_id: &str, user: Message, bot: Message) -> bool {
        self.mutate(|state| {
            let conversation = state.find_mut(conversation_id)?;
            conversation.messages.push(user);
            conversation.messages.push(bot);
            conversation.touch();
            Some(((), vec![StoreEvent::ConversationsChanged]))
        })
        .is_some()
    }

    /// Merge `patch` into a message. Unknown IDs are a no-op returning `false`.
    pub fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        patch: MessagePatch,
    ) -> bool {
        self.mutate(|state| {
            let conversation = state.find_mut(conversation_id)?;
            if !conversation.patch_message(message_id, patch) {
                return None;
            }
            conversation.touch();
            Some((
                (),
                vec![StoreEvent::MessageUpdated {
                    conversation_id: conversation_id.to_owned(),
                    message_id: message_id.to_owned(),
                }],
            ))
        })
        .is_some()
    }

    /// Drop `message_id` and every later message. Returns the number removed.
    pub fn truncate_after(&self, conversation_id: &str, message_id: &str) -> Option<usize> {
        self.mutate(|state| {
            let conversation = state.find_mut(conversation_id)?;
            let index = conversation.messages.iter().position(|m| m.id == message_id)?;
            let removed = conversation.messages.len() - index;
            conversation.messages.truncate(index);
            conversation.touch();
            Some((removed, vec![StoreEvent::ConversationsChanged]))
        })
    }

    /// Record a rating. Repeating the current rating resets it to none.
    ///
    /// Returns the feedback now stored, or `None` if the message is unknown.
    pub fn set_feedback(
        &self,
        conversation_id: &str,
        message_id: &str,
        feedback: Feedback,
    ) -> Option<Feedback> {
        let current = self.message(conversation_id, message_id)?.feedback;
        let next = if current == feedback { Feedback::None } else { feedback };
        self.update_message(conversation_id, message_id, MessagePatch::default().feedback(next))
            .then_some(next)
    }
}
