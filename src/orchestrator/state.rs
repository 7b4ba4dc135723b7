//! Turn lifecycle states.

/// Where the orchestrator is in the current turn.
///
/// ```text
/// Idle → Building → Streaming ⇄ ToolPending → Finalizing → Idle
///                       └──────────┴──→ Cancelled → Idle
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TurnState {
    /// No turn in progress.
    #[default]
    Idle,
    /// Assembling the request from history and input.
    Building,
    /// Consuming the chunk stream.
    Streaming,
    /// A function call is being serviced before streaming resumes.
    ToolPending,
    /// Stream completed; title and speech side effects are running.
    Finalizing,
    /// The user stopped the turn.
    Cancelled,
}

impl TurnState {
    /// Whether a response is being produced (the UI's loading indicator).
    pub fn is_loading(self) -> bool {
        matches!(self, Self::Building | Self::Streaming | Self::ToolPending)
    }

    /// Short lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::Streaming => "streaming",
            Self::ToolPending => "tool_pending",
            Self::Finalizing => "finalizing",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_states() {
        assert!(!TurnState::Idle.is_loading());
        assert!(TurnState::Building.is_loading());
        assert!(TurnState::Streaming.is_loading());
        assert!(TurnState::ToolPending.is_loading());
        assert!(!TurnState::Finalizing.is_loading());
        assert!(!TurnState::Cancelled.is_loading());
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(TurnState::ToolPending.to_string(), "tool_pending");
        assert_eq!(TurnState::default(), TurnState::Idle);
    }
}
