//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the turn controller with mock implementations.

use crate::backend::{
    BackendClient, BackendError, Conversation, ConversationSummary, RecordStream, TurnRequest,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Conversation CRUD collaborator
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// List conversations, newest first
    async fn list(&self) -> Result<Vec<ConversationSummary>, BackendError>;

    /// Fetch a conversation with its transcript
    async fn get(&self, id: &str) -> Result<Conversation, BackendError>;

    /// Create an empty conversation
    async fn create(&self) -> Result<ConversationSummary, BackendError>;

    /// Delete a conversation
    async fn delete(&self, id: &str) -> Result<(), BackendError>;
}

/// Streaming transport for a single turn
#[async_trait]
pub trait TurnTransport: Send + Sync {
    /// Open the turn stream.
    ///
    /// The returned stream ends when the server closes the body. If `cancel`
    /// fires it yields one [`BackendError::cancelled`] and ends.
    async fn open(
        &self,
        conversation_id: &str,
        request: &TurnRequest,
        cancel: CancellationToken,
    ) -> Result<RecordStream, BackendError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationApi + ?Sized> ConversationApi for Arc<T> {
    async fn list(&self) -> Result<Vec<ConversationSummary>, BackendError> {
        (**self).list().await
    }

    async fn get(&self, id: &str) -> Result<Conversation, BackendError> {
        (**self).get(id).await
    }

    async fn create(&self) -> Result<ConversationSummary, BackendError> {
        (**self).create().await
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        (**self).delete(id).await
    }
}

#[async_trait]
impl<T: TurnTransport + ?Sized> TurnTransport for Arc<T> {
    async fn open(
        &self,
        conversation_id: &str,
        request: &TurnRequest,
        cancel: CancellationToken,
    ) -> Result<RecordStream, BackendError> {
        (**self).open(conversation_id, request, cancel).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

#[async_trait]
impl ConversationApi for BackendClient {
    async fn list(&self) -> Result<Vec<ConversationSummary>, BackendError> {
        self.list_conversations().await
    }

    async fn get(&self, id: &str) -> Result<Conversation, BackendError> {
        self.get_conversation(id).await
    }

    async fn create(&self) -> Result<ConversationSummary, BackendError> {
        self.create_conversation().await
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        self.delete_conversation(id).await
    }
}

#[async_trait]
impl TurnTransport for BackendClient {
    async fn open(
        &self,
        conversation_id: &str,
        request: &TurnRequest,
        cancel: CancellationToken,
    ) -> Result<RecordStream, BackendError> {
        self.stream_turn(conversation_id, request, cancel).await
    }
}
