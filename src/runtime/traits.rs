//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{Database, Direction, StoredMessage};
use crate::dialogue::{DialogueState, SessionAttributes};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::protocol::{DialogueMessage, Envelope};
use crate::transport::{DeliveryError, MailboxTransport};
use async_trait::async_trait;
use std::sync::Arc;

/// Storage for session message history
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Record a protocol message for the session
    async fn add_message(
        &self,
        session_id: &str,
        direction: Direction,
        message: &DialogueMessage,
    ) -> Result<StoredMessage, String>;

    /// Get all messages for a session
    async fn get_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, String>;
}

/// Storage for session state and attributes
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Update the session state (full state as JSON)
    async fn update_state(&self, session_id: &str, state: &DialogueState) -> Result<(), String>;

    /// Overwrite the session's persona and model
    async fn set_attributes(
        &self,
        session_id: &str,
        attributes: &SessionAttributes,
    ) -> Result<(), String>;
}

/// Client for making LLM requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete an LLM request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Outbound channel to peer agents
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError>;
}

/// Combined storage trait for convenience
pub trait Storage: MessageStore + StateStore {}
impl<T: MessageStore + StateStore> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
    async fn add_message(
        &self,
        session_id: &str,
        direction: Direction,
        message: &DialogueMessage,
    ) -> Result<StoredMessage, String> {
        (**self).add_message(session_id, direction, message).await
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, String> {
        (**self).get_messages(session_id).await
    }
}

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    async fn update_state(&self, session_id: &str, state: &DialogueState) -> Result<(), String> {
        (**self).update_state(session_id, state).await
    }

    async fn set_attributes(
        &self,
        session_id: &str,
        attributes: &SessionAttributes,
    ) -> Result<(), String> {
        (**self).set_attributes(session_id, attributes).await
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        (**self).deliver(envelope).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for DatabaseStorage {
    async fn add_message(
        &self,
        session_id: &str,
        direction: Direction,
        message: &DialogueMessage,
    ) -> Result<StoredMessage, String> {
        self.db
            .add_message(session_id, direction, message)
            .map_err(|e| e.to_string())
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, String> {
        self.db.get_messages(session_id).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl StateStore for DatabaseStorage {
    async fn update_state(&self, session_id: &str, state: &DialogueState) -> Result<(), String> {
        self.db
            .update_session_state(session_id, state)
            .map_err(|e| e.to_string())
    }

    async fn set_attributes(
        &self,
        session_id: &str,
        attributes: &SessionAttributes,
    ) -> Result<(), String> {
        self.db
            .set_attributes(session_id, attributes)
            .map_err(|e| e.to_string())
    }
}

/// Adapter to use an `LlmService` as `LlmClient`
pub struct ServiceLlmClient {
    service: Arc<dyn LlmService>,
}

impl ServiceLlmClient {
    pub fn new(service: Arc<dyn LlmService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl LlmClient for ServiceLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.service.complete(request).await
    }
}

#[async_trait]
impl Transport for MailboxTransport {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        MailboxTransport::deliver(self, envelope).await
    }
}
