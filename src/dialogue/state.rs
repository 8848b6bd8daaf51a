//! Dialogue state types

use crate::llm::LlmErrorKind;
use serde::{Deserialize, Serialize};

// ============================================================================
// Session Attributes
// ============================================================================

/// Persona and model chosen by the peer at initiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAttributes {
    /// Free-text persona used verbatim in the system prompt
    pub assistant: String,
    /// Completion model identifier, not validated unless strict models is on
    pub model: String,
}

impl SessionAttributes {
    pub fn new(assistant: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            assistant: assistant.into(),
            model: model.into(),
        }
    }

    /// Greeting sent back in the acceptance reply
    pub fn greeting(&self) -> String {
        format!(
            "Hello, I am your {} assistant and I am running on LLM Model {}",
            self.assistant, self.model
        )
    }
}

// ============================================================================
// Dialogue State
// ============================================================================

/// Dialogue state of one session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialogueState {
    /// No initiation received yet
    #[default]
    Idle,

    /// Initiation accepted, greeting being delivered
    Initiated { attributes: SessionAttributes },

    /// Greeting delivered, waiting for the first user turn
    Accepted { attributes: SessionAttributes },

    /// Completion in flight for the current user turn
    Generating {
        attributes: SessionAttributes,
        /// Turns completed before this one
        turns: u32,
        /// Id the completion outcome must carry to answer this turn
        #[serde(default)]
        turn_id: u64,
    },

    /// At least one reply produced, waiting for the next user turn
    Continuing {
        attributes: SessionAttributes,
        turns: u32,
    },

    /// Session ended by the peer or by a closed stream
    Concluded { turns: u32 },

    /// Session declined
    Rejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl DialogueState {
    /// Short name used in logs and the API
    pub fn name(&self) -> &'static str {
        match self {
            DialogueState::Idle => "idle",
            DialogueState::Initiated { .. } => "initiated",
            DialogueState::Accepted { .. } => "accepted",
            DialogueState::Generating { .. } => "generating",
            DialogueState::Continuing { .. } => "continuing",
            DialogueState::Concluded { .. } => "concluded",
            DialogueState::Rejected { .. } => "rejected",
        }
    }

    /// Attributes, when the session has been initiated and not ended
    pub fn attributes(&self) -> Option<&SessionAttributes> {
        match self {
            DialogueState::Initiated { attributes }
            | DialogueState::Accepted { attributes }
            | DialogueState::Generating { attributes, .. }
            | DialogueState::Continuing { attributes, .. } => Some(attributes),
            DialogueState::Idle
            | DialogueState::Concluded { .. }
            | DialogueState::Rejected { .. } => None,
        }
    }

    /// Attributes and completed turn count, if a user turn can start now
    pub fn ready_for_turn(&self) -> Option<(&SessionAttributes, u32)> {
        match self {
            DialogueState::Initiated { attributes } | DialogueState::Accepted { attributes } => {
                Some((attributes, 0))
            }
            DialogueState::Continuing { attributes, turns } => Some((attributes, *turns)),
            _ => None,
        }
    }

    /// Number of completed turns
    pub fn turns(&self) -> u32 {
        match self {
            DialogueState::Generating { turns, .. }
            | DialogueState::Continuing { turns, .. }
            | DialogueState::Concluded { turns } => *turns,
            _ => 0,
        }
    }

    pub fn is_generating(&self) -> bool {
        matches!(self, DialogueState::Generating { .. })
    }

    /// Concluded and rejected sessions only leave via a new initiation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DialogueState::Concluded { .. } | DialogueState::Rejected { .. }
        )
    }

    /// Nothing pending: the session can be rebuilt from storage when next addressed
    pub fn is_dormant(&self) -> bool {
        matches!(self, DialogueState::Idle) || self.is_terminal()
    }

    /// State a session returns to when its in-flight turn is abandoned
    pub fn settled(&self) -> DialogueState {
        match self {
            DialogueState::Generating {
                attributes,
                turns: 0,
                ..
            } => DialogueState::Accepted {
                attributes: attributes.clone(),
            },
            DialogueState::Generating {
                attributes, turns, ..
            } => DialogueState::Continuing {
                attributes: attributes.clone(),
                turns: *turns,
            },
            other => other.clone(),
        }
    }
}

// ============================================================================
// Error Kinds
// ============================================================================

/// Failure classification reported to peers in `ErrorMessage` replies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Completion did not finish within the configured timeout
    UpstreamTimeout,
    /// Completion API unreachable or failing
    UpstreamError,
    Auth,
    RateLimit,
    ModelNotFound,
    InvalidRequest,
    /// A message arrived while a completion was in flight
    AgentBusy,
    /// A continuation arrived before any initiation
    NoSession,
}

impl From<LlmErrorKind> for ErrorKind {
    fn from(kind: LlmErrorKind) -> Self {
        match kind {
            LlmErrorKind::Timeout => ErrorKind::UpstreamTimeout,
            LlmErrorKind::Auth => ErrorKind::Auth,
            LlmErrorKind::RateLimit => ErrorKind::RateLimit,
            LlmErrorKind::ModelNotFound => ErrorKind::ModelNotFound,
            LlmErrorKind::InvalidRequest => ErrorKind::InvalidRequest,
            LlmErrorKind::Network | LlmErrorKind::ServerError | LlmErrorKind::Unknown => {
                ErrorKind::UpstreamError
            }
        }
    }
}

// ============================================================================
// Dialogue Context
// ============================================================================

/// Context for a session
#[derive(Debug, Clone)]
pub struct DialogueContext {
    pub session_id: String,
    /// Address replies are sent to
    pub peer: String,
    /// This agent's own address, used as the reply sender
    pub agent_address: String,
    /// Reject initiations naming a model outside the catalog
    pub strict_models: bool,
    /// Id given to the next completion; advanced by the executor when one starts
    pub next_turn_id: u64,
}

impl DialogueContext {
    pub fn new(
        session_id: impl Into<String>,
        peer: impl Into<String>,
        agent_address: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            peer: peer.into(),
            agent_address: agent_address.into(),
            strict_models: false,
            next_turn_id: 1,
        }
    }

    pub fn with_strict_models(mut self, strict: bool) -> Self {
        self.strict_models = strict;
        self
    }
}
