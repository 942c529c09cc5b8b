//! Backend request and response types

use crate::state_machine::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Body of the streaming turn request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnRequest {
    pub content: String,
    pub web_search: bool,
}

/// Entry in the conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub title: Option<String>,
}

/// A conversation with its full transcript.
///
/// Messages are shared behind `Arc` so that replacing the last message
/// produces a new sequence without touching the values other readers hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Arc<Message>>,
}

impl Conversation {
    #[cfg(test)]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            title: None,
            messages: Vec::new(),
        }
    }

    /// Summary view used to seed the conversation list
    #[cfg(test)]
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            created_at: self.created_at.clone(),
            message_count: self.messages.len(),
            title: self.title.clone(),
        }
    }
}
