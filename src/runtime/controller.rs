//! Turn controller
//!
//! Owns the selected conversation's transcript and drives one streamed
//! council turn at a time per conversation: optimistic append, fold events
//! through the reducer, then roll back or keep, and reconcile the list.

use super::cancellation::{TurnToken, TurnTokens};
use super::traits::{ConversationApi, TurnTransport};
use crate::backend::{BackendError, Conversation, ConversationSummary, TurnRequest};
use crate::state_machine::{transition, AssistantMessage, Effect, Event, Message};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Per-turn options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnOptions {
    pub web_search: bool,
}

/// How a turn that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The server sent `complete` (or closed the stream cleanly)
    Completed,
    /// Aborted by the user; partial results stay in the transcript
    Cancelled,
}

/// Turn failures surfaced to the application
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("No conversation selected")]
    NoConversation,
    /// Request or body stream failed; the optimistic messages were removed
    #[error("Failed to send message: {0}")]
    Transport(#[source] BackendError),
    /// The pipeline reported an error event; the transcript is kept
    #[error("Council pipeline failed: {message}")]
    Protocol { message: String },
}

/// Session-level controller for council turns
pub struct TurnController<A, T>
where
    A: ConversationApi,
    T: TurnTransport,
{
    api: A,
    transport: T,
    tokens: TurnTokens,
    conversations: watch::Sender<Vec<ConversationSummary>>,
    current: watch::Sender<Option<Conversation>>,
    busy: watch::Sender<bool>,
    last_error: watch::Sender<Option<String>>,
}

impl<A, T> TurnController<A, T>
where
    A: ConversationApi,
    T: TurnTransport,
{
    pub fn new(api: A, transport: T) -> Self {
        Self {
            api,
            transport,
            tokens: TurnTokens::new(),
            conversations: watch::channel(Vec::new()).0,
            current: watch::channel(None).0,
            busy: watch::channel(false).0,
            last_error: watch::channel(None).0,
        }
    }

    // ------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------

    pub fn subscribe_conversation(&self) -> watch::Receiver<Option<Conversation>> {
        self.current.subscribe()
    }

    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }

    /// Snapshot of the selected conversation
    pub fn conversation(&self) -> Option<Conversation> {
        self.current.borrow().clone()
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.conversations.borrow().clone()
    }

    pub fn selected_id(&self) -> Option<String> {
        self.current.borrow().as_ref().map(|c| c.id.clone())
    }

    /// Failure indicator for the latest turn; cleared when a turn starts
    pub fn subscribe_errors(&self) -> watch::Receiver<Option<String>> {
        self.last_error.subscribe()
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    #[cfg(test)]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    // ------------------------------------------------------------------
    // Conversation lifecycle
    // ------------------------------------------------------------------

    /// Re-fetch the conversation list. Failures are logged, not surfaced.
    pub async fn reload_conversations(&self) {
        match self.api.list().await {
            Ok(list) => {
                self.conversations.send_replace(list);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to reload conversations"),
        }
    }

    /// Load a conversation and make it the selected one
    pub async fn select(&self, id: &str) -> Result<(), BackendError> {
        let conversation = self.api.get(id).await?;
        tracing::debug!(conv_id = %id, messages = conversation.messages.len(), "Conversation selected");
        self.current.send_replace(Some(conversation));
        Ok(())
    }

    /// Create a conversation, list it first and select it
    pub async fn new_conversation(&self) -> Result<ConversationSummary, BackendError> {
        let created = self.api.create().await?;
        let listed = ConversationSummary {
            message_count: 0,
            ..created.clone()
        };
        self.conversations.send_modify(|list| list.insert(0, listed));
        self.select(&created.id).await?;
        Ok(created)
    }

    /// Delete a conversation; clears the selection if it was selected
    pub async fn delete(&self, id: &str) -> Result<(), BackendError> {
        self.api.delete(id).await?;
        self.conversations.send_modify(|list| list.retain(|c| c.id != id));
        if self.selected_id().as_deref() == Some(id) {
            self.abort(id);
            self.current.send_replace(None);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    /// Signal the in-flight turn for `conversation_id`.
    ///
    /// Clears the busy indicator immediately; the turn's own cleanup runs
    /// once its stream unwinds. Returns `false` if nothing was in flight.
    pub fn abort(&self, conversation_id: &str) -> bool {
        if !self.tokens.abort(conversation_id) {
            return false;
        }
        tracing::info!(conv_id = %conversation_id, "Turn abort requested");
        self.busy.send_replace(false);
        true
    }

    /// Abort the selected conversation's turn, if any
    pub fn abort_current(&self) -> bool {
        self.selected_id().is_some_and(|id| self.abort(&id))
    }

    /// Run one council turn in the selected conversation.
    ///
    /// The caller must not start a second turn for the same conversation
    /// while one is in flight.
    pub async fn send_turn(
        &self,
        content: &str,
        options: TurnOptions,
    ) -> Result<TurnOutcome, TurnError> {
        let Some(conversation_id) = self.selected_id() else {
            return Err(TurnError::NoConversation);
        };

        let turn = self.tokens.begin(&conversation_id);
        self.busy.send_replace(true);
        self.last_error.send_replace(None);

        // Optimistic append: the user message and an empty result record
        let user = Arc::new(Message::user(content));
        let mut base_len = None;
        self.update_transcript(&conversation_id, |messages| {
            base_len = Some(messages.len());
            messages.push(Arc::clone(&user));
            messages.push(Arc::new(Message::Assistant(AssistantMessage::placeholder())));
        });

        tracing::info!(
            conv_id = %conversation_id,
            turn_id = turn.turn_id(),
            web_search = options.web_search,
            "Starting council turn"
        );

        let request = TurnRequest {
            content: content.to_string(),
            web_search: options.web_search,
        };
        let result = self.drive(&turn, &request, base_len.map(|n| n + 1)).await;

        match &result {
            Ok(TurnOutcome::Completed) => {
                tracing::info!(conv_id = %conversation_id, "Council turn completed");
            }
            Ok(TurnOutcome::Cancelled) => {
                tracing::info!(conv_id = %conversation_id, "Council turn aborted, keeping partial results");
            }
            Err(e @ TurnError::Transport(_)) => {
                tracing::warn!(conv_id = %conversation_id, error = %e, "Council turn failed, rolling back");
                self.rollback(&conversation_id, &user, base_len);
                self.last_error.send_replace(Some(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(conv_id = %conversation_id, error = %e, "Council turn ended with an error");
                self.last_error.send_replace(Some(e.to_string()));
            }
        }

        self.tokens.finish(&turn);
        if !self.tokens.is_live(&conversation_id) {
            self.busy.send_replace(false);
        }
        self.reload_conversations().await;

        result
    }

    /// Consume the stream, folding each event into the open message.
    /// Events are applied strictly one after another.
    async fn drive(
        &self,
        turn: &TurnToken,
        request: &TurnRequest,
        slot: Option<usize>,
    ) -> Result<TurnOutcome, TurnError> {
        let conversation_id = turn.conversation_id();

        let mut records = match self
            .transport
            .open(conversation_id, request, turn.cancellation())
            .await
        {
            Ok(records) => records,
            Err(e) => return settle(e),
        };

        let mut open = AssistantMessage::placeholder();

        while let Some(next) = records.next().await {
            if turn.is_cancelled() {
                return Ok(TurnOutcome::Cancelled);
            }
            let record = match next {
                Ok(record) => record,
                Err(e) => return settle(e),
            };

            let event = match Event::from_record(&record) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(
                        conv_id = %conversation_id,
                        event_type = %record.event_type,
                        error = %e,
                        "Skipping malformed event"
                    );
                    continue;
                }
            };
            let result = transition(&open, &event, Utc::now());
            if result.message != open {
                self.replace_open_message(conversation_id, slot, &result.message);
            }
            open = result.message;

            for effect in result.effects {
                match effect {
                    Effect::ReloadConversations => self.reload_conversations().await,
                    Effect::ApplyTitle { title } => self.apply_title(conversation_id, &title),
                    Effect::TurnComplete => return Ok(TurnOutcome::Completed),
                    Effect::TurnFailed { message } => return Err(TurnError::Protocol { message }),
                }
            }
        }

        if turn.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }
        tracing::warn!(conv_id = %conversation_id, "Turn stream ended without a terminal event");
        Ok(TurnOutcome::Completed)
    }

    /// Copy-on-write edit of the selected transcript. No-op (returns
    /// `false`) when `conversation_id` is no longer selected.
    fn update_transcript(
        &self,
        conversation_id: &str,
        edit: impl FnOnce(&mut Vec<Arc<Message>>),
    ) -> bool {
        let snapshot = self.current.borrow().clone();
        match snapshot {
            Some(mut conversation) if conversation.id == conversation_id => {
                edit(&mut conversation.messages);
                self.current.send_replace(Some(conversation));
                true
            }
            _ => false,
        }
    }

    fn replace_open_message(&self, conversation_id: &str, slot: Option<usize>, message: &AssistantMessage) {
        let Some(slot) = slot else {
            return;
        };
        let replacement = Arc::new(Message::Assistant(message.clone()));
        self.update_transcript(conversation_id, |messages| {
            if let Some(entry) = messages.get_mut(slot) {
                *entry = replacement;
            }
        });
    }

    /// Remove exactly the optimistic user/assistant pair
    fn rollback(&self, conversation_id: &str, user: &Arc<Message>, base_len: Option<usize>) {
        let Some(base_len) = base_len else {
            return;
        };
        self.update_transcript(conversation_id, |messages| {
            if messages
                .get(base_len)
                .is_some_and(|entry| Arc::ptr_eq(entry, user))
            {
                messages.truncate(base_len);
            }
        });
    }

    /// Show a generated title before the authoritative list reload lands
    fn apply_title(&self, conversation_id: &str, title: &str) {
        self.conversations.send_modify(|list| {
            if let Some(summary) = list.iter_mut().find(|s| s.id == conversation_id) {
                summary.title = Some(title.to_string());
            }
        });
        let snapshot = self.current.borrow().clone();
        if let Some(mut conversation) = snapshot.filter(|c| c.id == conversation_id) {
            conversation.title = Some(title.to_string());
            self.current.send_replace(Some(conversation));
        }
    }
}

/// Cancellation is an outcome, everything else a transport failure
fn settle(err: BackendError) -> Result<TurnOutcome, TurnError> {
    if err.is_cancelled() {
        Ok(TurnOutcome::Cancelled)
    } else {
        Err(TurnError::Transport(err))
    }
}
