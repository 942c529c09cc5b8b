//! reqwest-backed backend client

use super::sse::{record_stream, RecordStream};
use super::{BackendError, Conversation, ConversationSummary, TurnRequest};
use crate::config::ClientConfig;
use reqwest::{Client, Response};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CRUD_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the council backend HTTP API
#[derive(Clone)]
pub struct BackendClient {
    /// Request/response calls, bounded by `CRUD_TIMEOUT`
    client: Client,
    /// Turn streams; a council run can take minutes so no overall timeout
    stream_client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &ClientConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(CRUD_TIMEOUT)
            .build()?;
        let stream_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            stream_client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map non-success statuses to `BackendError::http` with the body as message
    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("backend returned {status}")
        } else {
            format!("backend returned {status}: {body}")
        };
        Err(BackendError::http(status.as_u16(), message))
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, BackendError> {
        let response = self.client.get(self.url("/api/conversations")).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation, BackendError> {
        let response = self
            .client
            .get(self.url(&format!("/api/conversations/{id}")))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn create_conversation(&self) -> Result<ConversationSummary, BackendError> {
        let response = self
            .client
            .post(self.url("/api/conversations"))
            .json(&json!({}))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.url(&format!("/api/conversations/{id}")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// POST a turn and stream its events back.
    ///
    /// Aborting `cancel` while the request is in flight or while the body is
    /// being read yields [`BackendError::cancelled`].
    pub async fn stream_turn(
        &self,
        conversation_id: &str,
        request: &TurnRequest,
        cancel: CancellationToken,
    ) -> Result<RecordStream, BackendError> {
        let send = self
            .stream_client
            .post(self.url(&format!("/api/conversations/{conversation_id}/message/stream")))
            .json(request)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(BackendError::cancelled()),
            response = send => response?,
        };
        let response = Self::check(response).await?;

        tracing::debug!(conv_id = %conversation_id, "Turn stream opened");
        Ok(record_stream(response.bytes_stream(), cancel))
    }
}
