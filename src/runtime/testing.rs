//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use crate::db::{Direction, StoredMessage};
use crate::dialogue::{DialogueState, SessionAttributes};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::protocol::{DialogueMessage, Envelope};
use crate::transport::DeliveryError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.next(request)
    }
}

#[async_trait]
impl LlmService for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.next(request)
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ============================================================================
// Delayed Mock LLM Client (for cancellation and timeout testing)
// ============================================================================

/// Mock LLM client with configurable delay
pub struct DelayedMockLlmClient {
    inner: MockLlmClient,
    delay: Duration,
    /// Notified when request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl DelayedMockLlmClient {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockLlmClient::new(),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.inner.queue_response(response);
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.inner.recorded_requests()
    }
}

#[async_trait]
impl LlmClient for DelayedMockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.inner.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

// ============================================================================
// Recording Transport
// ============================================================================

/// Transport that records every envelope and can simulate a closed peer
pub struct RecordingTransport {
    sent: Mutex<Vec<Envelope>>,
    failure: Mutex<Option<DeliveryError>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    /// Fail every delivery after recording it
    pub fn fail_with(&self, error: DeliveryError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    /// Envelopes delivered so far, in order
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<DialogueMessage> {
        self.sent().into_iter().map(|e| e.message).collect()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(envelope.clone());
        match self.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory storage for testing
pub struct InMemoryStorage {
    messages: Mutex<HashMap<String, Vec<StoredMessage>>>,
    states: Mutex<HashMap<String, DialogueState>>,
    attributes: Mutex<HashMap<String, SessionAttributes>>,
    /// Number of `set_attributes` calls, to catch duplicate writes
    attribute_writes: Mutex<usize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            attributes: Mutex::new(HashMap::new()),
            attribute_writes: Mutex::new(0),
        }
    }

    /// Get all messages for a session
    pub fn get_all_messages(&self, session_id: &str) -> Vec<StoredMessage> {
        self.messages
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Get current state for a session
    pub fn get_current_state(&self, session_id: &str) -> Option<DialogueState> {
        self.states.lock().unwrap().get(session_id).cloned()
    }

    pub fn get_attributes(&self, session_id: &str) -> Option<SessionAttributes> {
        self.attributes.lock().unwrap().get(session_id).cloned()
    }

    pub fn attribute_writes(&self) -> usize {
        *self.attribute_writes.lock().unwrap()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryStorage {
    async fn add_message(
        &self,
        session_id: &str,
        direction: Direction,
        message: &DialogueMessage,
    ) -> Result<StoredMessage, String> {
        let mut messages = self.messages.lock().unwrap();
        let history = messages.entry(session_id.to_string()).or_default();
        #[allow(clippy::cast_possible_wrap)]
        let sequence_id = history.len() as i64 + 1;

        let stored = StoredMessage {
            session_id: session_id.to_string(),
            sequence_id,
            direction,
            message: message.clone(),
            created_at: chrono::Utc::now(),
        };
        history.push(stored.clone());
        Ok(stored)
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, String> {
        Ok(self.get_all_messages(session_id))
    }
}

#[async_trait]
impl StateStore for InMemoryStorage {
    async fn update_state(&self, session_id: &str, state: &DialogueState) -> Result<(), String> {
        self.states
            .lock()
            .unwrap()
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn set_attributes(
        &self,
        session_id: &str,
        attributes: &SessionAttributes,
    ) -> Result<(), String> {
        *self.attribute_writes.lock().unwrap() += 1;
        self.attributes
            .lock()
            .unwrap()
            .insert(session_id.to_string(), attributes.clone());
        Ok(())
    }
}

// ============================================================================
// Test Runtime Builder
// ============================================================================

use crate::dialogue::{DialogueContext, Event};
use crate::runtime::SessionRuntime;
use tokio::sync::mpsc;

pub const TEST_SESSION: &str = "test-session";
pub const TEST_PEER: &str = "agent1qpeer";
pub const TEST_AGENT: &str = "agent1qagent";

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Helper for building test runtimes with minimal boilerplate
pub struct TestRuntime<L: LlmClient + 'static> {
    pub storage: Arc<InMemoryStorage>,
    pub transport: Arc<RecordingTransport>,
    pub event_tx: mpsc::Sender<Event>,
    pub llm: Arc<L>,
    _runtime_handle: tokio::task::JoinHandle<()>,
}

impl TestRuntime<MockLlmClient> {
    /// Create a simple test runtime with instant mocks
    pub fn new() -> TestRuntimeBuilder<MockLlmClient> {
        TestRuntimeBuilder::new()
    }
}

pub struct TestRuntimeBuilder<L> {
    llm: Option<L>,
    transport: Option<RecordingTransport>,
    strict_models: bool,
    completion_timeout: Duration,
    initial_state: DialogueState,
}

impl<L: LlmClient + 'static> TestRuntimeBuilder<L> {
    pub fn llm<M: LlmClient + 'static>(self, llm: M) -> TestRuntimeBuilder<M> {
        TestRuntimeBuilder {
            llm: Some(llm),
            transport: self.transport,
            strict_models: self.strict_models,
            completion_timeout: self.completion_timeout,
            initial_state: self.initial_state,
        }
    }

    pub fn transport(mut self, transport: RecordingTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn strict_models(mut self, strict: bool) -> Self {
        self.strict_models = strict;
        self
    }

    pub fn completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn initial_state(mut self, state: DialogueState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn build_with(self, default_llm: impl FnOnce() -> L) -> TestRuntime<L> {
        let storage = Arc::new(InMemoryStorage::new());
        let transport = Arc::new(self.transport.unwrap_or_default());
        let llm = Arc::new(self.llm.unwrap_or_else(default_llm));

        let context = DialogueContext::new(TEST_SESSION, TEST_PEER, TEST_AGENT)
            .with_strict_models(self.strict_models);
        let (event_tx, event_rx) = mpsc::channel(32);

        let runtime = SessionRuntime::new(
            context,
            self.initial_state,
            storage.clone(),
            llm.clone(),
            transport.clone(),
            event_rx,
            &event_tx,
            self.completion_timeout,
        );

        let handle = tokio::spawn(async move {
            runtime.run().await;
        });

        TestRuntime {
            storage,
            transport,
            event_tx,
            llm,
            _runtime_handle: handle,
        }
    }
}

impl TestRuntimeBuilder<MockLlmClient> {
    pub fn new() -> Self {
        Self {
            llm: None,
            transport: None,
            strict_models: false,
            completion_timeout: Duration::from_secs(2),
            initial_state: DialogueState::Idle,
        }
    }

    pub fn build(self) -> TestRuntime<MockLlmClient> {
        self.build_with(MockLlmClient::new)
    }
}

impl Default for TestRuntimeBuilder<MockLlmClient> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: LlmClient + 'static> TestRuntime<L> {
    async fn send(&self, event: Event) {
        self.event_tx.send(event).await.expect("Failed to send event");
    }

    pub async fn send_initiate(&self, persona: &str, model: &str) {
        self.send(Event::Initiate {
            assistant_type: persona.to_string(),
            model: model.to_string(),
        })
        .await;
    }

    pub async fn send_message(&self, text: &str) {
        self.send(Event::UserMessage {
            text: text.to_string(),
        })
        .await;
    }

    pub async fn send_conclude(&self) {
        self.send(Event::Conclude).await;
    }

    pub async fn send_reject(&self) {
        self.send(Event::Reject).await;
    }

    /// Wait until the stored state has the given `type` tag
    pub async fn wait_for_state(&self, expected_type: &str) -> bool {
        wait_until(|| {
            self.storage
                .get_current_state(TEST_SESSION)
                .is_some_and(|s| s.name() == expected_type)
        })
        .await
    }

    /// Wait until at least `count` envelopes have been delivered
    pub async fn wait_for_sent(&self, count: usize) -> bool {
        wait_until(|| self.transport.sent().len() >= count).await
    }

    /// Outbound messages in delivery order
    pub fn sent(&self) -> Vec<DialogueMessage> {
        self.transport.sent_messages()
    }

    /// Get all messages from storage
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.storage.get_all_messages(TEST_SESSION)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{MAX_TOKENS, TEMPERATURE};
    use crate::dialogue::ErrorKind;
    use crate::protocol::{AcceptChitChatDialogue, ChitChatDialogueMessage};

    const PERSONA: &str = "math tutor";
    const MODEL: &str = "llama3-8b-8192";
    const GREETING: &str =
        "Hello, I am your math tutor assistant and I am running on LLM Model llama3-8b-8192";

    fn accept() -> DialogueMessage {
        DialogueMessage::Accept(AcceptChitChatDialogue::new(GREETING))
    }

    fn agent(text: &str) -> DialogueMessage {
        DialogueMessage::Continue(ChitChatDialogueMessage::agent(text))
    }

    #[tokio::test]
    async fn test_mock_llm_client() {
        let mock = MockLlmClient::new();
        mock.queue_response(LlmResponse::text("Hello"));

        let request = crate::completion::build_request(PERSONA, "hi", MODEL);
        let response = LlmClient::complete(&mock, &request).await.unwrap();
        assert_eq!(response.text, "Hello");
        assert_eq!(mock.recorded_requests().len(), 1);

        // Queue exhausted
        assert!(LlmClient::complete(&mock, &request).await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemoryStorage::new();
        let first = storage
            .add_message("s", Direction::Inbound, &DialogueMessage::conclude())
            .await
            .unwrap();
        let second = storage
            .add_message("s", Direction::Outbound, &accept())
            .await
            .unwrap();
        assert_eq!(first.sequence_id, 1);
        assert_eq!(second.sequence_id, 2);
        assert_eq!(storage.get_messages("s").await.unwrap().len(), 2);
        assert!(storage.get_current_state("s").is_none());
    }

    /// Initiation stores exactly the requested attributes and greets once
    #[tokio::test]
    async fn test_initiate_accepts_with_greeting() {
        let rt = TestRuntime::new().build();
        rt.send_initiate(PERSONA, MODEL).await;

        assert!(rt.wait_for_state("accepted").await);
        assert_eq!(rt.sent(), vec![accept()]);
        assert_eq!(
            rt.storage.get_attributes(TEST_SESSION),
            Some(SessionAttributes::new(PERSONA, MODEL))
        );

        let envelope = &rt.transport.sent()[0];
        assert_eq!(envelope.sender, TEST_AGENT);
        assert_eq!(envelope.target, TEST_PEER);
        assert_eq!(envelope.session, TEST_SESSION);
    }

    /// Full dialogue: initiate, one turn, reply text verbatim
    #[tokio::test]
    async fn test_end_to_end_turn() {
        let llm = MockLlmClient::new();
        llm.queue_response(LlmResponse::text("4"));

        let rt = TestRuntime::new().llm(llm).build();
        rt.send_initiate(PERSONA, MODEL).await;
        rt.send_message("What is 2+2?").await;

        assert!(rt.wait_for_state("continuing").await);
        assert!(rt.wait_for_sent(2).await);
        assert_eq!(rt.sent(), vec![accept(), agent("4")]);

        let requests = rt.llm.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].system[0].text,
            "You are a math tutor. You reply with very short answers."
        );
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].messages[0].content, "What is 2+2?");
        assert_eq!(requests[0].model, MODEL);
        assert_eq!(requests[0].max_tokens, Some(MAX_TOKENS));
        assert_eq!(requests[0].temperature.map(f32::to_bits), Some(TEMPERATURE.to_bits()));

        // Inbound initiate, accept, inbound turn, reply
        let history = rt.messages();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].direction, Direction::Inbound);
        assert_eq!(history[3].direction, Direction::Outbound);
    }

    /// Each turn is an independent two-message exchange
    #[tokio::test]
    async fn test_turns_carry_no_history() {
        let llm = MockLlmClient::new();
        llm.queue_response(LlmResponse::text("4"));
        llm.queue_response(LlmResponse::text("6"));

        let rt = TestRuntime::new().llm(llm).build();
        rt.send_initiate(PERSONA, MODEL).await;
        rt.send_message("What is 2+2?").await;
        assert!(rt.wait_for_sent(2).await);
        rt.send_message("And 3+3?").await;
        assert!(rt.wait_for_sent(3).await);

        assert_eq!(rt.sent()[2], agent("6"));
        let requests = rt.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 1);
        assert_eq!(requests[1].messages[0].content, "And 3+3?");
        assert_eq!(
            rt.storage.get_current_state(TEST_SESSION).map(|s| s.turns()),
            Some(2)
        );
    }

    /// Re-initiation overwrites attributes and later turns use them
    #[tokio::test]
    async fn test_reinitiate_overwrites_attributes() {
        let llm = MockLlmClient::new();
        llm.queue_response(LlmResponse::text("Arr"));

        let rt = TestRuntime::new().llm(llm).build();
        rt.send_initiate(PERSONA, MODEL).await;
        rt.send_initiate("pirate", "gemma2-9b-it").await;
        rt.send_message("Hello").await;
        assert!(rt.wait_for_sent(3).await);

        assert_eq!(
            rt.storage.get_attributes(TEST_SESSION),
            Some(SessionAttributes::new("pirate", "gemma2-9b-it"))
        );
        assert_eq!(rt.storage.attribute_writes(), 2);
        let requests = rt.llm.recorded_requests();
        assert!(requests[0].system[0].text.contains("pirate"));
        assert_eq!(requests[0].model, "gemma2-9b-it");
    }

    #[tokio::test]
    async fn test_conclude_sends_nothing() {
        let rt = TestRuntime::new().build();
        rt.send_initiate(PERSONA, MODEL).await;
        assert!(rt.wait_for_sent(1).await);
        rt.send_conclude().await;

        assert!(rt.wait_for_state("concluded").await);
        assert_eq!(rt.sent(), vec![accept()]);
        assert_eq!(rt.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_reject_sends_nothing() {
        let rt = TestRuntime::new().build();
        rt.send_reject().await;

        assert!(rt.wait_for_state("rejected").await);
        assert!(rt.sent().is_empty());
    }

    #[tokio::test]
    async fn test_continuation_without_session_errors() {
        let rt = TestRuntime::new().build();
        rt.send_message("hello?").await;

        assert!(rt.wait_for_sent(1).await);
        match &rt.sent()[0] {
            DialogueMessage::Error(err) => assert_eq!(err.kind, ErrorKind::NoSession),
            other => panic!("Expected error reply, got {other:?}"),
        }
        assert!(rt.llm.recorded_requests().is_empty());

        // The refused turn is still part of the history, ahead of the answer
        let history = rt.messages();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].direction, Direction::Inbound);
        assert_eq!(
            history[0].message,
            DialogueMessage::Continue(ChitChatDialogueMessage::user("hello?"))
        );
        assert_eq!(history[1].direction, Direction::Outbound);
        assert!(matches!(history[1].message, DialogueMessage::Error(_)));
    }

    #[tokio::test]
    async fn test_completion_error_is_reported() {
        let llm = MockLlmClient::new();
        llm.queue_error(LlmError::model_not_found("model does not exist"));
        llm.queue_response(LlmResponse::text("ok"));

        let rt = TestRuntime::new().llm(llm).build();
        rt.send_initiate(PERSONA, "no-such-model").await;
        rt.send_message("hi").await;
        assert!(rt.wait_for_sent(2).await);

        match &rt.sent()[1] {
            DialogueMessage::Error(err) => assert_eq!(err.kind, ErrorKind::ModelNotFound),
            other => panic!("Expected error reply, got {other:?}"),
        }

        // Session stays usable
        rt.send_message("again").await;
        assert!(rt.wait_for_sent(3).await);
        assert_eq!(rt.sent()[2], agent("ok"));
    }

    #[tokio::test]
    async fn test_completion_timeout() {
        let llm = DelayedMockLlmClient::new(Duration::from_secs(5));
        llm.queue_response(LlmResponse::text("too late"));

        let rt = TestRuntime::new()
            .llm(llm)
            .completion_timeout(Duration::from_millis(50))
            .build_with(|| DelayedMockLlmClient::new(Duration::ZERO));
        rt.send_initiate(PERSONA, MODEL).await;
        rt.send_message("slow question").await;

        assert!(rt.wait_for_sent(2).await);
        match &rt.sent()[1] {
            DialogueMessage::Error(err) => assert_eq!(err.kind, ErrorKind::UpstreamTimeout),
            other => panic!("Expected timeout error, got {other:?}"),
        }
        assert!(rt.wait_for_state("accepted").await);
    }

    #[tokio::test]
    async fn test_conclude_cancels_completion() {
        let llm = DelayedMockLlmClient::new(Duration::from_millis(300));
        llm.queue_response(LlmResponse::text("discarded"));
        let started = llm.request_started.clone();

        let rt = TestRuntime::new()
            .llm(llm)
            .build_with(|| DelayedMockLlmClient::new(Duration::ZERO));
        rt.send_initiate(PERSONA, MODEL).await;
        rt.send_message("long question").await;

        tokio::time::timeout(Duration::from_secs(2), started.notified())
            .await
            .expect("Completion never started");
        rt.send_conclude().await;

        assert!(rt.wait_for_state("concluded").await);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rt.sent(), vec![accept()]);
        assert_eq!(
            rt.storage.get_current_state(TEST_SESSION),
            Some(DialogueState::Concluded { turns: 0 })
        );
    }

    #[tokio::test]
    async fn test_message_while_generating_is_busy() {
        let llm = DelayedMockLlmClient::new(Duration::from_millis(200));
        llm.queue_response(LlmResponse::text("first"));
        let started = llm.request_started.clone();

        let rt = TestRuntime::new()
            .llm(llm)
            .build_with(|| DelayedMockLlmClient::new(Duration::ZERO));
        rt.send_initiate(PERSONA, MODEL).await;
        rt.send_message("one").await;
        tokio::time::timeout(Duration::from_secs(2), started.notified())
            .await
            .expect("Completion never started");
        rt.send_message("two").await;

        assert!(rt.wait_for_sent(3).await);
        let sent = rt.sent();
        assert!(matches!(&sent[1], DialogueMessage::Error(err) if err.kind == ErrorKind::AgentBusy));
        assert_eq!(sent[2], agent("first"));
        assert_eq!(rt.llm.recorded_requests().len(), 1);

        let busy_turn = DialogueMessage::Continue(ChitChatDialogueMessage::user("two"));
        assert!(rt
            .messages()
            .iter()
            .any(|m| m.direction == Direction::Inbound && m.message == busy_turn));
    }

    /// An outcome from a cancelled turn never answers a later one
    #[tokio::test]
    async fn test_outcome_of_concluded_turn_is_discarded() {
        let llm = DelayedMockLlmClient::new(Duration::from_millis(200));
        llm.queue_response(LlmResponse::text("answer to TWO"));
        let started = llm.request_started.clone();

        let rt = TestRuntime::new()
            .llm(llm)
            .build_with(|| DelayedMockLlmClient::new(Duration::ZERO));
        rt.send_initiate(PERSONA, MODEL).await;
        rt.send_message("ONE").await;
        tokio::time::timeout(Duration::from_secs(2), started.notified())
            .await
            .expect("First completion never started");
        rt.send_conclude().await;
        assert!(rt.wait_for_state("concluded").await);

        rt.send_initiate("pirate", "gemma2-9b-it").await;
        rt.send_message("TWO").await;
        tokio::time::timeout(Duration::from_secs(2), started.notified())
            .await
            .expect("Second completion never started");

        // Late arrival tagged with the first turn
        rt.event_tx
            .send(Event::CompletionReady {
                turn_id: 1,
                text: "answer to ONE".to_string(),
            })
            .await
            .unwrap();

        assert!(rt.wait_for_sent(3).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = rt.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent.last(), Some(&agent("answer to TWO")));
        assert!(!sent.contains(&agent("answer to ONE")));
        assert!(rt.wait_for_state("continuing").await);

        let requests = rt.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].model, "gemma2-9b-it");
    }

    /// A closed peer stream on reply delivery yields exactly one conclude
    #[tokio::test]
    async fn test_closed_peer_concludes_once() {
        let llm = MockLlmClient::new();
        llm.queue_response(LlmResponse::text("4"));

        let rt = TestRuntime::new().llm(llm).build();
        rt.send_initiate(PERSONA, MODEL).await;
        assert!(rt.wait_for_state("accepted").await);

        rt.transport.fail_with(DeliveryError::closed("stream closed"));
        rt.send_message("What is 2+2?").await;

        assert!(rt.wait_for_state("concluded").await);
        assert!(rt.wait_for_sent(3).await);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sent = rt.sent();
        assert_eq!(sent, vec![accept(), agent("4"), DialogueMessage::conclude()]);
    }

    #[tokio::test]
    async fn test_network_failure_is_not_a_conclusion() {
        let llm = MockLlmClient::new();
        llm.queue_response(LlmResponse::text("4"));

        let rt = TestRuntime::new().llm(llm).build();
        rt.transport.fail_with(DeliveryError::network("relay down"));
        rt.send_initiate(PERSONA, MODEL).await;
        rt.send_message("What is 2+2?").await;

        assert!(rt.wait_for_state("continuing").await);
        assert_eq!(rt.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_strict_models_rejects_unknown() {
        let rt = TestRuntime::new().strict_models(true).build();
        rt.send_initiate(PERSONA, "gpt-imaginary").await;

        assert!(rt.wait_for_state("rejected").await);
        assert!(rt.wait_for_sent(1).await);
        assert_eq!(rt.sent(), vec![DialogueMessage::reject()]);
        assert!(rt.storage.get_attributes(TEST_SESSION).is_none());
    }

    #[tokio::test]
    async fn test_interrupted_generation_is_settled_on_start() {
        let rt = TestRuntime::new()
            .initial_state(DialogueState::Generating {
                attributes: SessionAttributes::new(PERSONA, MODEL),
                turns: 3,
                turn_id: 9,
            })
            .build();

        assert!(rt.wait_for_state("continuing").await);
        assert!(rt.sent().is_empty());
    }
}
