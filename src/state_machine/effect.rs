//! Effects produced by state transitions

/// Work for the turn controller after a transition has been applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Re-fetch the conversation list (titles, counts changed server-side)
    ReloadConversations,

    /// Show a freshly generated title before the reload lands
    ApplyTitle { title: String },

    /// The pipeline finished; stop consuming events
    TurnComplete,

    /// The server reported a pipeline failure; stop consuming events
    TurnFailed { message: String },
}

impl Effect {
    pub fn turn_failed(message: Option<String>) -> Self {
        Effect::TurnFailed {
            message: message.unwrap_or_else(|| "Unknown error".to_string()),
        }
    }
}
