//! Events that can occur in a dialogue session

use super::ErrorKind;
use crate::protocol::{
    AcceptChitChatDialogue, ChitChatDialogueMessage, DialogueMessage, InitiateChitChatDialogue,
};
use thiserror::Error;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Peer events
    Initiate {
        assistant_type: String,
        model: String,
    },
    Accept {
        agent_message: String,
    },
    UserMessage {
        text: String,
    },
    Conclude,
    Reject,

    // Delivery events
    /// The last outbound reply reached the peer
    ReplyDelivered,
    /// The peer's stream closed while a reply was being sent
    PeerClosed {
        message: String,
    },

    // Completion events, tagged with the turn that requested them
    CompletionReady {
        turn_id: u64,
        text: String,
    },
    CompletionFailed {
        turn_id: u64,
        message: String,
        error_kind: ErrorKind,
    },
}

impl Event {
    /// The protocol message a peer event stands for; `None` for internal events
    pub fn inbound_message(&self) -> Option<DialogueMessage> {
        match self {
            Event::Initiate {
                assistant_type,
                model,
            } => Some(DialogueMessage::Initiate(InitiateChitChatDialogue {
                assistant_type: assistant_type.clone(),
                model: model.clone(),
            })),
            Event::Accept { agent_message } => Some(DialogueMessage::Accept(
                AcceptChitChatDialogue::new(agent_message.clone()),
            )),
            Event::UserMessage { text } => Some(DialogueMessage::Continue(
                ChitChatDialogueMessage::user(text.clone()),
            )),
            Event::Conclude => Some(DialogueMessage::conclude()),
            Event::Reject => Some(DialogueMessage::reject()),
            Event::ReplyDelivered
            | Event::PeerClosed { .. }
            | Event::CompletionReady { .. }
            | Event::CompletionFailed { .. } => None,
        }
    }
}

/// Inbound messages that cannot become events
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InboundError {
    #[error("ChitChatDialogueMessage without user_message")]
    MissingUserMessage,
    #[error("Unexpected ErrorMessage from peer: {0}")]
    PeerError(String),
}

impl TryFrom<DialogueMessage> for Event {
    type Error = InboundError;

    fn try_from(message: DialogueMessage) -> Result<Self, Self::Error> {
        match message {
            DialogueMessage::Initiate(init) => Ok(Event::Initiate {
                assistant_type: init.assistant_type,
                model: init.model,
            }),
            DialogueMessage::Accept(accept) => Ok(Event::Accept {
                agent_message: accept.agent_message,
            }),
            DialogueMessage::Continue(msg) => msg
                .user_message
                .map(|text| Event::UserMessage { text })
                .ok_or(InboundError::MissingUserMessage),
            DialogueMessage::Conclude(_) => Ok(Event::Conclude),
            DialogueMessage::Reject(_) => Ok(Event::Reject),
            DialogueMessage::Error(err) => Err(InboundError::PeerError(err.error)),
        }
    }
}
