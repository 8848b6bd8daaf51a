//! API request and response types

use crate::db::{Session, StoredMessage};
use crate::llm::ModelDef;
use serde::Serialize;

/// Response for an accepted envelope
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub queued: bool,
    pub session: String,
}

/// Response with a list of sessions
#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<Session>,
    /// Sessions with a live runtime task
    pub active: usize,
}

/// Response with a session and its dialogue history
#[derive(Debug, Serialize)]
pub struct SessionWithMessagesResponse {
    pub session: Session,
    pub messages: Vec<StoredMessage>,
    pub generating: bool,
}

/// Response with the supported model catalog
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: &'static [ModelDef],
    /// Whether initiations naming other models are rejected
    pub strict: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
