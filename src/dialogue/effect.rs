//! Effects produced by state transitions

use super::SessionAttributes;
use crate::protocol::{AcceptChitChatDialogue, ChitChatDialogueMessage, DialogueMessage};

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Record an inbound message in the session history
    RecordInbound { message: DialogueMessage },

    /// Overwrite the stored persona and model for the session
    PersistAttributes { attributes: SessionAttributes },

    /// Persist the new state
    PersistState,

    /// Record and send a reply to the peer
    Deliver {
        message: DialogueMessage,
        /// Conclude the session if the peer's stream turns out to be closed
        conclude_on_close: bool,
    },

    /// Start a completion (spawns as background task)
    RequestCompletion {
        turn_id: u64,
        persona: String,
        user_message: String,
        model: String,
    },

    /// Abort the in-flight completion
    AbortCompletion,

    /// Log the stored message history of the session
    LogHistory,

    /// Log a notice without changing anything
    Notice { message: String },
}

impl Effect {
    pub fn reply(message: DialogueMessage) -> Self {
        Effect::Deliver {
            message,
            conclude_on_close: true,
        }
    }

    pub fn accept(attributes: &SessionAttributes) -> Self {
        Effect::reply(DialogueMessage::Accept(AcceptChitChatDialogue::new(
            attributes.greeting(),
        )))
    }

    pub fn agent_message(text: impl Into<String>) -> Self {
        Effect::reply(DialogueMessage::Continue(ChitChatDialogueMessage::agent(text)))
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Effect::Notice {
            message: message.into(),
        }
    }
}
