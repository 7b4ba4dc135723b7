//! Conversation titles from the first turn.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::conversation::ConversationStore;
use crate::gateway::GenerativeGateway;

const MAX_TITLE_CHARS: usize = 60;

/// Prompt asking for a short title of the turn transcript.
pub fn title_prompt(user_text: &str, bot_text: &str) -> String {
    format!(
        "Write a short title (at most five words) for a hotel-booking chat that \
         starts like this. Reply with the title only, no quotes.\n\n\
         User: {user_text}\nAssistant: {bot_text}"
    )
}

/// First non-empty line, unquoted and length-capped.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_start_matches(|c| matches!(c, '#' | '*' | ' '))
        .trim_end_matches(|c| matches!(c, '*' | '.' | ' '))
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”'))
        .trim();
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(MAX_TITLE_CHARS).collect())
}

/// Ask the gateway for a title and apply it. Failures are logged and swallowed.
pub async fn generate_title(
    gateway: Arc<dyn GenerativeGateway>,
    store: Arc<ConversationStore>,
    conversation_id: String,
    prompt: String,
) {
    match gateway.generate_once(&prompt).await {
        Ok(raw) => match clean_title(&raw) {
            Some(title) => {
                debug!(conversation_id = %conversation_id, title = %title, "conversation titled");
                if !store.rename_conversation(&conversation_id, title) {
                    debug!(
                        conversation_id = %conversation_id,
                        "titled conversation no longer exists"
                    );
                }
            }
            None => warn!(conversation_id = %conversation_id, "title response was blank"),
        },
        Err(e) => warn!(conversation_id = %conversation_id, error = %e, "title generation failed"),
    }
}
