//! Conversation and preference persistence across restarts.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use concierge::conversation::store::{ACTIVE_CONVERSATION_KEY, CONVERSATIONS_KEY};
use concierge::conversation::{
    ConversationStore, Feedback, GroundingChunk, GroundingSource, Message, MessagePatch, ToolCall,
};
use concierge::i18n::Language;
use concierge::storage::{FileKvStore, KeyValueStore, Preferences, Theme};
use serde_json::json;

fn open(dir: &std::path::Path) -> (ConversationStore, Arc<FileKvStore>) {
    let kv = Arc::new(FileKvStore::new(dir).unwrap());
    (ConversationStore::load(kv.clone(), "New chat"), kv)
}

#[test]
fn conversations_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    let (conversation_id, bot_id) = {
        let (store, _) = open(dir.path());
        let id = store.active_id();
        let user = Message::user("Rooms with a view?").with_image("data:image/png;base64,iVBOR");
        let bot = Message::bot_placeholder();
        let bot_id = bot.id.clone();
        assert!(store.append_turn(&id, user, bot));
        store.update_message(
            &id,
            &bot_id,
            MessagePatch::default()
                .text("Yes, the 12th floor suites.")
                .grounding(vec![GroundingChunk {
                    source: GroundingSource::Web,
                    uri: "https://hotel.example/suites".into(),
                    title: "Suites".into(),
                }])
                .tool_call(
                    ToolCall::pending("generate_image", json!({"prompt": "suite"}))
                        .resolved(json!({"status": "image generated"})),
                ),
        );
        store.set_feedback(&id, &bot_id, Feedback::Like);
        store.rename_conversation(&id, "Sea View Suites");
        (id, bot_id)
    };

    let (reloaded, _) = open(dir.path());
    assert_eq!(reloaded.active_id(), conversation_id);
    let conversation = reloaded.active_conversation().unwrap();
    assert_eq!(conversation.title, "Sea View Suites");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(
        conversation.messages[0].image_url.as_deref(),
        Some("data:image/png;base64,iVBOR")
    );
    let bot = reloaded.message(&conversation_id, &bot_id).unwrap();
    assert_eq!(bot.text, "Yes, the 12th floor suites.");
    assert_eq!(bot.feedback, Feedback::Like);
    assert_eq!(bot.grounding_chunks.len(), 1);
    assert!(bot.tool_call.is_some_and(|c| c.is_resolved()));
}

#[test]
fn active_selection_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let first = {
        let (store, _) = open(dir.path());
        let first = store.active_id();
        let second = store.create_conversation();
        assert_eq!(store.active_id(), second.id);
        assert!(store.select_conversation(&first));
        first
    };

    let (reloaded, _) = open(dir.path());
    assert_eq!(reloaded.list_conversations().len(), 2);
    assert_eq!(reloaded.active_id(), first);
}

#[test]
fn dangling_active_id_falls_back_to_a_stored_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let ids: Vec<String> = {
        let (store, _) = open(dir.path());
        store.create_conversation();
        store.list_conversations().into_iter().map(|c| c.id).collect()
    };
    {
        let kv = FileKvStore::new(dir.path()).unwrap();
        kv.set(ACTIVE_CONVERSATION_KEY, "\"gone\"").unwrap();
    }

    let (reloaded, _) = open(dir.path());
    assert!(ids.contains(&reloaded.active_id()));
}

#[test]
fn corrupt_snapshot_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    {
        let kv = FileKvStore::new(dir.path()).unwrap();
        kv.set(CONVERSATIONS_KEY, "{ not json").unwrap();
    }

    let (store, kv) = open(dir.path());
    let conversations = store.list_conversations();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].title, "New chat");
    assert!(conversations[0].messages.is_empty());
    // The fresh state is written back immediately.
    let raw = kv.get(CONVERSATIONS_KEY).unwrap().unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&raw).is_ok());
}

#[test]
fn deleting_last_conversation_leaves_a_fresh_one_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (store, _) = open(dir.path());
        let id = store.active_id();
        assert!(store.delete_conversation(&id));
        assert_eq!(store.list_conversations().len(), 1);
        assert_ne!(store.active_id(), id);
    }

    let (reloaded, _) = open(dir.path());
    assert_eq!(reloaded.list_conversations().len(), 1);
}

#[test]
fn preferences_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    {
        let kv = FileKvStore::new(dir.path()).unwrap();
        let mut prefs = Preferences::load(&kv);
        assert_eq!(prefs, Preferences::default());
        prefs.set_voice_enabled(&kv, true).unwrap();
        prefs.set_voice_id(&kv, "Puck").unwrap();
        prefs.set_map_grounding(&kv, false).unwrap();
        prefs.set_language(&kv, Language::Thai).unwrap();
        prefs.set_theme(&kv, Theme::Dark).unwrap();
    }

    let kv = FileKvStore::new(dir.path()).unwrap();
    let prefs = Preferences::load(&kv);
    assert!(prefs.voice_enabled);
    assert_eq!(prefs.voice_id, "Puck");
    assert!(!prefs.map_grounding);
    assert_eq!(prefs.language, Language::Thai);
    assert_eq!(prefs.theme, Theme::Dark);
}
