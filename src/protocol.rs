//! `ChitChatDialogue` wire protocol
//!
//! Message schemas exchanged with peer agents and the envelope that carries
//! them. Messages are adjacently tagged: `{"schema": "<Name>", "payload": {..}}`.

use crate::dialogue::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PROTOCOL_NAME: &str = "ChitChatDialogue";
pub const PROTOCOL_VERSION: &str = "0.66";
pub const ENVELOPE_VERSION: u32 = 1;

/// Protocol identifier carried in envelopes (`name:version`)
pub fn protocol_id() -> String {
    format!("{PROTOCOL_NAME}:{PROTOCOL_VERSION}")
}

/// Discriminator for dialogue message text fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserMessage,
    #[default]
    AgentMessage,
}

/// Opens a session, choosing the persona and model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateChitChatDialogue {
    pub assistant_type: String,
    pub model: String,
}

/// Acknowledges a session with a greeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptChitChatDialogue {
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub agent_message: String,
}

impl AcceptChitChatDialogue {
    pub fn new(agent_message: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::AgentMessage,
            agent_message: agent_message.into(),
        }
    }
}

/// One turn of the dialogue, in either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChitChatDialogueMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_message: Option<String>,
}

impl ChitChatDialogueMessage {
    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::AgentMessage,
            user_message: None,
            agent_message: Some(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::UserMessage,
            user_message: Some(text.into()),
            agent_message: None,
        }
    }
}

/// Ends the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConcludeChitChatDialogue {}

/// Declines the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RejectChitChatDialogue {}

/// Reports a failure to the peer instead of leaving it without a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
    pub kind: ErrorKind,
}

/// Any message of the protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema", content = "payload")]
pub enum DialogueMessage {
    #[serde(rename = "InitiateChitChatDialogue")]
    Initiate(InitiateChitChatDialogue),
    #[serde(rename = "AcceptChitChatDialogue")]
    Accept(AcceptChitChatDialogue),
    #[serde(rename = "ChitChatDialogueMessage")]
    Continue(ChitChatDialogueMessage),
    #[serde(rename = "ConcludeChitChatDialogue")]
    Conclude(ConcludeChitChatDialogue),
    #[serde(rename = "RejectChitChatDialogue")]
    Reject(RejectChitChatDialogue),
    #[serde(rename = "ErrorMessage")]
    Error(ErrorMessage),
}

impl DialogueMessage {
    /// Schema name as it appears on the wire
    pub fn schema(&self) -> &'static str {
        match self {
            DialogueMessage::Initiate(_) => "InitiateChitChatDialogue",
            DialogueMessage::Accept(_) => "AcceptChitChatDialogue",
            DialogueMessage::Continue(_) => "ChitChatDialogueMessage",
            DialogueMessage::Conclude(_) => "ConcludeChitChatDialogue",
            DialogueMessage::Reject(_) => "RejectChitChatDialogue",
            DialogueMessage::Error(_) => "ErrorMessage",
        }
    }

    pub fn conclude() -> Self {
        DialogueMessage::Conclude(ConcludeChitChatDialogue {})
    }

    pub fn reject() -> Self {
        DialogueMessage::Reject(RejectChitChatDialogue {})
    }

    pub fn error(error: impl Into<String>, kind: ErrorKind) -> Self {
        DialogueMessage::Error(ErrorMessage {
            error: error.into(),
            kind,
        })
    }

    /// Payload without the schema tag
    pub fn payload(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(Value::take))
            .unwrap_or(Value::Null)
    }
}

fn default_envelope_version() -> u32 {
    ENVELOPE_VERSION
}

/// Addressed message exchanged between agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_envelope_version")]
    pub version: u32,
    pub sender: String,
    #[serde(default)]
    pub target: String,
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub message: DialogueMessage,
}

impl Envelope {
    pub fn new(
        sender: impl Into<String>,
        target: impl Into<String>,
        session: impl Into<String>,
        message: DialogueMessage,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            sender: sender.into(),
            target: target.into(),
            session: session.into(),
            protocol: Some(protocol_id()),
            message,
        }
    }
}

/// Machine-readable description of the protocol this agent speaks
pub fn manifest() -> Value {
    json!({
        "name": PROTOCOL_NAME,
        "version": PROTOCOL_VERSION,
        "role": "responder",
        "messages": {
            "InitiateChitChatDialogue": {
                "assistant_type": "string",
                "model": "string"
            },
            "AcceptChitChatDialogue": {
                "type": "agent_message",
                "agent_message": "string"
            },
            "ChitChatDialogueMessage": {
                "type": "user_message | agent_message",
                "user_message": "string?",
                "agent_message": "string?"
            },
            "ConcludeChitChatDialogue": {},
            "RejectChitChatDialogue": {},
            "ErrorMessage": {
                "error": "string",
                "kind": "string"
            }
        },
        "transitions": [
            {"from": "idle", "on": "InitiateChitChatDialogue", "to": "initiated", "reply": "AcceptChitChatDialogue"},
            {"from": "initiated", "on": "AcceptChitChatDialogue delivered", "to": "accepted"},
            {"from": "accepted | continuing", "on": "ChitChatDialogueMessage", "to": "generating"},
            {"from": "generating", "on": "completion", "to": "continuing", "reply": "ChitChatDialogueMessage"},
            {"from": "*", "on": "ConcludeChitChatDialogue", "to": "concluded"},
            {"from": "*", "on": "RejectChitChatDialogue", "to": "rejected"}
        ]
    })
}
