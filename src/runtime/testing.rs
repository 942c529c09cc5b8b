//! Mock implementations for testing
//!
//! These mocks enable controller tests without real I/O. The scripted
//! transport renders its records to SSE bytes and runs them through the
//! real decoder, so chunk handling and cancellation behave as in production.

use super::traits::*;
use crate::backend::sse::record_stream;
use crate::backend::{
    BackendError, Conversation, ConversationSummary, RecordStream, StreamRecord, TurnRequest,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Conversation API
// ============================================================================

/// In-memory conversation store that counts list reloads
#[allow(dead_code)]
pub struct MockConversationApi {
    conversations: Mutex<Vec<Conversation>>,
    created: AtomicUsize,
    list_calls: AtomicUsize,
    fail_list: AtomicBool,
}

#[allow(dead_code)]
impl MockConversationApi {
    pub fn new() -> Self {
        Self {
            conversations: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            fail_list: AtomicBool::new(false),
        }
    }

    pub fn with_conversation(self, conversation: Conversation) -> Self {
        self.conversations.lock().unwrap().insert(0, conversation);
        self
    }

    /// Number of list requests served (or refused) so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn set_list_failing(&self, failing: bool) {
        self.fail_list.store(failing, Ordering::SeqCst);
    }

    pub fn set_title(&self, id: &str, title: &str) {
        if let Some(conv) = self.conversations.lock().unwrap().iter_mut().find(|c| c.id == id) {
            conv.title = Some(title.to_string());
        }
    }
}

#[async_trait]
impl ConversationApi for MockConversationApi {
    async fn list(&self) -> Result<Vec<ConversationSummary>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(BackendError::network("connection refused"));
        }
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .map(Conversation::summary)
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Conversation, BackendError> {
        self.conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| BackendError::http(404, "Conversation not found"))
    }

    async fn create(&self) -> Result<ConversationSummary, BackendError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let conversation = Conversation::new(format!("new-{n}"));
        let summary = conversation.summary();
        self.conversations.lock().unwrap().insert(0, conversation);
        Ok(summary)
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let mut conversations = self.conversations.lock().unwrap();
        let before = conversations.len();
        conversations.retain(|c| c.id != id);
        if conversations.len() == before {
            return Err(BackendError::http(404, "Conversation not found"));
        }
        Ok(())
    }
}

// ============================================================================
// Scripted Transport
// ============================================================================

/// What the next opened stream does
#[allow(dead_code)]
pub enum Script {
    /// Serve the records, then close the body
    Records(Vec<Value>),
    /// Serve the records, then keep the body open until cancelled
    Hang(Vec<Value>),
    /// Serve the records, then fail the next read
    Break(Vec<Value>, String),
    /// Refuse the request before any body arrives
    Refuse(BackendError),
    /// Ignore cancellation: serve `before`, wait for the token, then keep
    /// serving `after` as if those records were already in flight
    Lagging { before: Vec<Value>, after: Vec<Value> },
}

/// Transport that plays back one [`Script`] per opened turn
#[allow(dead_code)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    /// Record of all turn requests made
    pub requests: Mutex<Vec<(String, TurnRequest)>>,
    opened: Notify,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            opened: Notify::new(),
        }
    }

    pub fn queue(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Resolves once a stream has been opened
    pub async fn wait_opened(&self) {
        self.opened.notified().await;
    }

    pub fn recorded_requests(&self) -> Vec<(String, TurnRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

fn wire(records: &[Value]) -> Vec<Result<Vec<u8>, String>> {
    records
        .iter()
        .map(|r| Ok(format!("data: {r}\n\n").into_bytes()))
        .collect()
}

fn as_record(value: Value) -> StreamRecord {
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    StreamRecord {
        event_type,
        payload: value,
    }
}

#[async_trait]
impl TurnTransport for ScriptedTransport {
    async fn open(
        &self,
        conversation_id: &str,
        request: &TurnRequest,
        cancel: CancellationToken,
    ) -> Result<RecordStream, BackendError> {
        self.requests
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), request.clone()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Refuse(BackendError::network("No script queued")));
        self.opened.notify_one();

        match script {
            Script::Records(records) => Ok(record_stream(stream::iter(wire(&records)), cancel)),
            Script::Hang(records) => {
                let body = stream::iter(wire(&records)).chain(stream::pending());
                Ok(record_stream(body, cancel))
            }
            Script::Break(records, reason) => {
                let body = stream::iter(wire(&records)).chain(stream::iter([Err(reason)]));
                Ok(record_stream(body, cancel))
            }
            Script::Refuse(err) => Err(err),
            Script::Lagging { before, after } => {
                let gate = stream::once(async move { cancel.cancelled().await })
                    .filter_map(|()| async { None::<Value> });
                let records = stream::iter(before)
                    .chain(gate)
                    .chain(stream::iter(after))
                    .map(|value| Ok::<_, BackendError>(as_record(value)));
                Ok(records.boxed())
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendErrorKind;
    use crate::runtime::{TurnController, TurnError, TurnOptions, TurnOutcome};
    use crate::state_machine::{AssistantMessage, Message};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    type TestController = TurnController<Arc<MockConversationApi>, Arc<ScriptedTransport>>;

    struct Harness {
        api: Arc<MockConversationApi>,
        transport: Arc<ScriptedTransport>,
        controller: TestController,
    }

    async fn harness(conversation: Conversation) -> Harness {
        let id = conversation.id.clone();
        let api = Arc::new(MockConversationApi::new().with_conversation(conversation));
        let transport = Arc::new(ScriptedTransport::new());
        let controller = TurnController::new(Arc::clone(&api), Arc::clone(&transport));
        controller.select(&id).await.unwrap();
        Harness {
            api,
            transport,
            controller,
        }
    }

    fn history() -> Conversation {
        let mut conv = Conversation::new("c1");
        conv.messages = vec![
            Arc::new(Message::user("earlier question")),
            Arc::new(Message::Assistant(AssistantMessage::placeholder())),
        ];
        conv
    }

    fn last_assistant(controller: &TestController) -> AssistantMessage {
        let conv = controller.conversation().unwrap();
        conv.messages
            .last()
            .and_then(|m| m.as_assistant())
            .cloned()
            .expect("last message should be an assistant record")
    }

    fn full_turn() -> Vec<Value> {
        vec![
            json!({ "type": "stage1_start" }),
            json!({ "type": "stage1_init", "total": 2 }),
            json!({ "type": "stage1_progress", "count": 1, "total": 2,
                    "data": { "model": "openai/gpt-4o", "response": "Paris" } }),
            json!({ "type": "stage1_complete", "data": [
                { "model": "openai/gpt-4o", "response": "Paris" },
                { "model": "google/gemini-pro", "response": "Paris, France" }
            ] }),
            json!({ "type": "stage2_start" }),
            json!({ "type": "stage2_complete",
                    "data": [{ "model": "openai/gpt-4o", "ranking": "1. Response B",
                               "parsed_ranking": ["Response B", "Response A"] }],
                    "metadata": { "label_to_model": {
                        "Response A": "openai/gpt-4o", "Response B": "google/gemini-pro" } } }),
            json!({ "type": "stage3_start" }),
            json!({ "type": "stage3_complete",
                    "data": { "model": "google/gemini-pro", "response": "Paris." } }),
            json!({ "type": "complete" }),
        ]
    }

    #[tokio::test]
    async fn test_mock_api_crud() {
        let api = MockConversationApi::new();
        let created = api.create().await.unwrap();
        assert_eq!(api.list().await.unwrap().len(), 1);
        assert_eq!(api.get(&created.id).await.unwrap().id, created.id);

        api.delete(&created.id).await.unwrap();
        let err = api.delete(&created.id).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Http { status: 404 });
        assert_eq!(api.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_full_turn_completes() {
        let h = harness(history()).await;
        h.transport.queue(Script::Records(full_turn()));

        let outcome = h
            .controller
            .send_turn("What is the capital of France?", TurnOptions { web_search: true })
            .await
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Completed);

        let conv = h.controller.conversation().unwrap();
        assert_eq!(conv.messages.len(), 4);
        assert_eq!(
            *conv.messages[2],
            Message::user("What is the capital of France?")
        );

        let msg = last_assistant(&h.controller);
        assert_eq!(msg.stage1.as_ref().map(Vec::len), Some(2));
        assert_eq!(msg.stage2.as_ref().map(Vec::len), Some(1));
        assert_eq!(msg.stage3.as_ref().map(|s| s.response.as_str()), Some("Paris."));
        assert!(!msg.loading.any());
        assert_eq!(
            msg.metadata.unwrap().label_to_model().get("Response B").map(String::as_str),
            Some("google/gemini-pro")
        );

        assert!(!h.controller.is_busy());
        assert_eq!(h.controller.last_error(), None);
        assert_eq!(h.api.list_calls(), 1);

        let requests = h.transport.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "c1");
        assert!(requests[0].1.web_search);
    }

    #[tokio::test]
    async fn test_no_conversation_selected() {
        let api = Arc::new(MockConversationApi::new());
        let transport = Arc::new(ScriptedTransport::new());
        let controller = TurnController::new(Arc::clone(&api), Arc::clone(&transport));

        let err = controller
            .send_turn("hello", TurnOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::NoConversation));
        assert!(transport.recorded_requests().is_empty());
        assert_eq!(api.list_calls(), 0);
        assert!(!controller.is_busy());
    }

    /// Abort mid-turn: stage 1 stays loading and empty, nothing else lands
    #[tokio::test]
    async fn test_abort_freezes_partial_state() {
        let h = harness(Conversation::new("c1")).await;
        h.transport.queue(Script::Lagging {
            before: vec![json!({ "type": "stage1_start" })],
            after: vec![
                json!({ "type": "stage1_complete", "data": [{ "model": "m", "response": "late" }] }),
                json!({ "type": "complete" }),
            ],
        });

        let mut transcript = h.controller.subscribe_conversation();
        let abort = async {
            tokio::time::timeout(
                Duration::from_secs(2),
                transcript.wait_for(|conv| {
                    conv.as_ref()
                        .and_then(|c| c.messages.last())
                        .and_then(|m| m.as_assistant())
                        .is_some_and(|a| a.loading.stage1)
                }),
            )
            .await
            .expect("stage1_start should be applied")
            .unwrap();
            assert!(h.controller.abort("c1"));
            assert!(!h.controller.is_busy());
        };

        let (outcome, ()) = tokio::join!(
            h.controller.send_turn("question", TurnOptions::default()),
            abort
        );
        assert_eq!(outcome.unwrap(), TurnOutcome::Cancelled);

        let conv = h.controller.conversation().unwrap();
        assert_eq!(conv.messages.len(), 2);
        let msg = last_assistant(&h.controller);
        assert!(msg.loading.stage1);
        assert_eq!(msg.stage1, None);
        assert!(msg.timers.stage1_start.is_some());

        assert_eq!(h.controller.last_error(), None);
        assert_eq!(h.api.list_calls(), 1);
    }

    /// Abort while the body is idle: the transport's cancellation wakes the read
    #[tokio::test]
    async fn test_abort_while_waiting_for_data() {
        let h = harness(Conversation::new("c1")).await;
        h.transport
            .queue(Script::Hang(vec![json!({ "type": "search_start" })]));

        let abort = async {
            h.transport.wait_opened().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.controller.abort_current()
        };
        let (outcome, aborted) = tokio::join!(
            h.controller.send_turn("question", TurnOptions { web_search: true }),
            abort
        );
        assert!(aborted);
        assert_eq!(outcome.unwrap(), TurnOutcome::Cancelled);
        assert_eq!(h.controller.conversation().unwrap().messages.len(), 2);
        assert!(!h.controller.is_busy());
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let h = harness(history()).await;
        let before = h.controller.conversation();

        assert!(!h.controller.abort("c1"));
        assert!(!h.controller.abort("c1"));
        assert!(!h.controller.abort("unknown"));

        assert_eq!(h.controller.conversation(), before);
        assert!(!h.controller.is_busy());
        assert_eq!(h.api.list_calls(), 0);
    }

    /// A second abort of a running turn is a no-op
    #[tokio::test]
    async fn test_double_abort_during_turn() {
        let h = harness(Conversation::new("c1")).await;
        h.transport
            .queue(Script::Hang(vec![json!({ "type": "stage1_start" })]));

        let abort = async {
            h.transport.wait_opened().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            let first = h.controller.abort("c1");
            let frozen = h.controller.conversation();
            let second = h.controller.abort("c1");
            assert_eq!(h.controller.conversation(), frozen);
            (first, second)
        };
        let (outcome, (first, second)) = tokio::join!(
            h.controller.send_turn("question", TurnOptions::default()),
            abort
        );

        assert!(first);
        assert!(!second);
        assert_eq!(outcome.unwrap(), TurnOutcome::Cancelled);
        assert!(!h.controller.is_busy());
        assert_eq!(h.controller.last_error(), None);
        assert_eq!(h.api.list_calls(), 1);
        assert!(!h.controller.abort("c1"));
    }

    /// Request failure removes exactly the two optimistic messages
    #[tokio::test]
    async fn test_transport_failure_rolls_back() {
        let h = harness(history()).await;
        let before = h.controller.conversation().unwrap();
        h.transport
            .queue(Script::Refuse(BackendError::network("connection refused")));

        let err = h
            .controller
            .send_turn("question", TurnOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Transport(_)));

        let after = h.controller.conversation().unwrap();
        assert_eq!(after.messages.len(), before.messages.len());
        for (a, b) in after.messages.iter().zip(&before.messages) {
            assert!(Arc::ptr_eq(a, b));
        }

        assert!(h.controller.last_error().unwrap().contains("connection refused"));
        assert!(!h.controller.is_busy());
        assert_eq!(h.api.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_http_error_rolls_back() {
        let h = harness(Conversation::new("c1")).await;
        h.transport
            .queue(Script::Refuse(BackendError::http(500, "Internal Server Error")));

        let err = h
            .controller
            .send_turn("question", TurnOptions::default())
            .await
            .unwrap_err();
        match err {
            TurnError::Transport(e) => assert_eq!(e.kind, BackendErrorKind::Http { status: 500 }),
            other => panic!("expected transport error, got {other:?}"),
        }
        assert!(h.controller.conversation().unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_rolls_back() {
        let h = harness(history()).await;
        h.transport.queue(Script::Break(
            vec![
                json!({ "type": "stage1_start" }),
                json!({ "type": "stage1_complete", "data": [] }),
            ],
            "connection reset".to_string(),
        ));

        let err = h
            .controller
            .send_turn("question", TurnOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Transport(_)));
        assert_eq!(h.controller.conversation().unwrap().messages.len(), 2);
        assert_eq!(h.api.list_calls(), 1);
    }

    /// A pipeline error keeps the transcript and reports the message
    #[tokio::test]
    async fn test_protocol_error_keeps_transcript() {
        let h = harness(Conversation::new("c1")).await;
        h.transport.queue(Script::Records(vec![
            json!({ "type": "stage1_start" }),
            json!({ "type": "error", "message": "All models failed" }),
            json!({ "type": "stage1_complete", "data": [{ "model": "m", "response": "ignored" }] }),
        ]));
        let mut errors = h.controller.subscribe_errors();

        let err = h
            .controller
            .send_turn("question", TurnOptions::default())
            .await
            .unwrap_err();
        match &err {
            TurnError::Protocol { message } => assert_eq!(message, "All models failed"),
            other => panic!("expected protocol error, got {other:?}"),
        }

        assert_eq!(h.controller.conversation().unwrap().messages.len(), 2);
        assert_eq!(last_assistant(&h.controller).stage1, None);
        assert!(h.controller.last_error().unwrap().contains("All models failed"));
        assert!(errors.has_changed().unwrap());
        assert_eq!(*errors.borrow_and_update(), h.controller.last_error());
        assert!(!h.controller.is_busy());
        assert_eq!(h.api.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_stream_end_without_terminal_event() {
        let h = harness(Conversation::new("c1")).await;
        h.transport.queue(Script::Records(vec![
            json!({ "type": "stage3_start" }),
            json!({ "type": "stage3_complete", "data": { "model": "m", "response": "done" } }),
        ]));

        let outcome = h
            .controller
            .send_turn("question", TurnOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(h.controller.conversation().unwrap().messages.len(), 2);
        assert_eq!(h.api.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_events_are_skipped() {
        let h = harness(Conversation::new("c1")).await;
        h.transport.queue(Script::Records(vec![
            json!({ "type": "stage1_start" }),
            json!({ "type": "stage1_init", "total": "three" }),
            json!({ "type": "heartbeat" }),
            json!({ "type": "stage1_complete", "data": [{ "model": "m", "response": "ok" }] }),
            json!({ "type": "complete" }),
        ]));

        let outcome = h
            .controller
            .send_turn("question", TurnOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Completed);
        let msg = last_assistant(&h.controller);
        assert_eq!(msg.stage1.as_ref().map(Vec::len), Some(1));
        assert_eq!(msg.progress.stage1.total, 0);
    }

    /// The generated title shows up before the list reload confirms it
    #[tokio::test]
    async fn test_title_applied_optimistically() {
        let h = harness(Conversation::new("c1")).await;
        h.controller.reload_conversations().await;
        h.api.set_list_failing(true);
        h.transport.queue(Script::Records(vec![
            json!({ "type": "title_complete", "data": { "title": "Capital of France" } }),
            json!({ "type": "complete" }),
        ]));

        h.controller
            .send_turn("question", TurnOptions::default())
            .await
            .unwrap();

        let list = h.controller.conversations();
        assert_eq!(list[0].title.as_deref(), Some("Capital of France"));
        assert_eq!(
            h.controller.conversation().unwrap().title.as_deref(),
            Some("Capital of France")
        );
        // initial load, title_complete, terminal reconciliation
        assert_eq!(h.api.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_title_reload_replaces_list() {
        let h = harness(Conversation::new("c1")).await;
        h.api.set_title("c1", "Server title");
        h.transport.queue(Script::Records(vec![
            json!({ "type": "title_complete" }),
            json!({ "type": "complete" }),
        ]));

        h.controller
            .send_turn("question", TurnOptions::default())
            .await
            .unwrap();
        assert_eq!(
            h.controller.conversations()[0].title.as_deref(),
            Some("Server title")
        );
        assert_eq!(h.api.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_turn_for_deselected_conversation_does_not_touch_new_selection() {
        let h = harness(Conversation::new("c1")).await;
        h.api.create().await.unwrap();
        h.transport
            .queue(Script::Hang(vec![json!({ "type": "stage1_start" })]));

        let switch = async {
            h.transport.wait_opened().await;
            h.controller.select("new-0").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.controller.abort("c1")
        };
        let (outcome, aborted) = tokio::join!(
            h.controller.send_turn("question", TurnOptions::default()),
            switch
        );
        assert!(aborted);
        assert_eq!(outcome.unwrap(), TurnOutcome::Cancelled);

        let conv = h.controller.conversation().unwrap();
        assert_eq!(conv.id, "new-0");
        assert!(conv.messages.is_empty());
    }

    #[tokio::test]
    async fn test_new_and_delete_conversation() {
        let h = harness(Conversation::new("c1")).await;

        let created = h.controller.new_conversation().await.unwrap();
        assert_eq!(h.controller.selected_id(), Some(created.id.clone()));
        assert_eq!(h.controller.conversations()[0].id, created.id);

        h.controller.delete(&created.id).await.unwrap();
        assert_eq!(h.controller.selected_id(), None);
        assert!(h
            .controller
            .conversations()
            .iter()
            .all(|c| c.id != created.id));

        assert!(h.controller.select("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_sequential_turns_accumulate() {
        let h = harness(Conversation::new("c1")).await;
        h.transport.queue(Script::Records(full_turn()));
        h.transport.queue(Script::Records(full_turn()));

        for _ in 0..2 {
            let outcome = h
                .controller
                .send_turn("again", TurnOptions::default())
                .await
                .unwrap();
            assert_eq!(outcome, TurnOutcome::Completed);
        }
        assert_eq!(h.controller.conversation().unwrap().messages.len(), 4);
        assert_eq!(h.api.list_calls(), 2);
    }
}
