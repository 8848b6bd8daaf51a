//! Pure state transition function
//!
//! Given the same state, context and event this always produces the same new
//! state and effects; all I/O happens in the executor.

use super::{DialogueContext, DialogueState, Effect, ErrorKind, Event, SessionAttributes};
use crate::llm::is_supported;
use crate::protocol::DialogueMessage;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: DialogueState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: DialogueState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Agent is busy generating a reply for this session")]
    AgentBusy,
    #[error("No dialogue has been initiated for this session")]
    NoSession,
}

impl TransitionError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            TransitionError::AgentBusy => ErrorKind::AgentBusy,
            TransitionError::NoSession => ErrorKind::NoSession,
        }
    }
}

/// Pure transition function
pub fn transition(
    state: &DialogueState,
    context: &DialogueContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    let recorded = event
        .inbound_message()
        .map(|message| Effect::RecordInbound { message });

    match (state, event) {
        // ============================================================
        // Initiation
        // ============================================================
        (DialogueState::Generating { .. }, Event::Initiate { .. }) => {
            Err(TransitionError::AgentBusy)
        }

        (_, Event::Initiate {
            assistant_type,
            model,
        }) => {
            if context.strict_models && !is_supported(&model) {
                return Ok(TransitionResult::new(DialogueState::Rejected {
                    reason: Some(format!("Unsupported model: {model}")),
                })
                .with_effects(recorded)
                .with_effect(Effect::PersistState)
                .with_effect(Effect::Deliver {
                    message: DialogueMessage::reject(),
                    conclude_on_close: false,
                }));
            }

            let attributes = SessionAttributes::new(assistant_type, model);
            Ok(TransitionResult::new(DialogueState::Initiated {
                attributes: attributes.clone(),
            })
            .with_effects(recorded)
            .with_effect(Effect::PersistAttributes {
                attributes: attributes.clone(),
            })
            .with_effect(Effect::PersistState)
            .with_effect(Effect::accept(&attributes)))
        }

        (DialogueState::Initiated { attributes }, Event::ReplyDelivered) => {
            Ok(TransitionResult::new(DialogueState::Accepted {
                attributes: attributes.clone(),
            })
            .with_effect(Effect::PersistState))
        }

        // Only the greeting's delivery moves the session forward
        (_, Event::ReplyDelivered) => Ok(TransitionResult::new(state.clone())),

        // This agent never initiates, so an accept is unsolicited
        (_, Event::Accept { .. }) => Ok(TransitionResult::new(state.clone())
            .with_effects(recorded)
            .with_effect(Effect::notice("Received unsolicited dialogue acceptance"))),

        // ============================================================
        // User turns
        // ============================================================
        (DialogueState::Generating { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::AgentBusy)
        }

        (_, Event::UserMessage { text }) => {
            let (attributes, turns) = state.ready_for_turn().ok_or(TransitionError::NoSession)?;
            let turn_id = context.next_turn_id;
            Ok(TransitionResult::new(DialogueState::Generating {
                attributes: attributes.clone(),
                turns,
                turn_id,
            })
            .with_effects(recorded)
            .with_effect(Effect::PersistState)
            .with_effect(Effect::RequestCompletion {
                turn_id,
                persona: attributes.assistant.clone(),
                user_message: text,
                model: attributes.model.clone(),
            }))
        }

        (
            DialogueState::Generating {
                attributes,
                turns,
                turn_id: active,
            },
            Event::CompletionReady { turn_id, text },
        ) if turn_id == *active => Ok(TransitionResult::new(DialogueState::Continuing {
            attributes: attributes.clone(),
            turns: turns + 1,
        })
        .with_effect(Effect::PersistState)
        .with_effect(Effect::agent_message(text))),

        (
            DialogueState::Generating {
                turn_id: active, ..
            },
            Event::CompletionFailed {
                turn_id,
                message,
                error_kind,
            },
        ) if turn_id == *active => Ok(TransitionResult::new(state.settled())
            .with_effect(Effect::PersistState)
            .with_effect(Effect::reply(DialogueMessage::error(message, error_kind)))),

        // Outcomes of cancelled or superseded turns are dropped
        (_, Event::CompletionReady { turn_id, .. } | Event::CompletionFailed { turn_id, .. }) => {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::notice(format!(
                "Discarding completion outcome for inactive turn {turn_id}"
            ))))
        }

        // ============================================================
        // Ending the session
        // ============================================================
        (_, Event::PeerClosed { message }) if !state.is_terminal() => {
            Ok(TransitionResult::new(DialogueState::Concluded {
                turns: state.turns(),
            })
            .with_effects(abort_if_generating(state))
            .with_effect(Effect::notice(format!("Peer stream closed: {message}")))
            .with_effect(Effect::PersistState)
            .with_effect(Effect::Deliver {
                message: DialogueMessage::conclude(),
                conclude_on_close: false,
            }))
        }

        (_, Event::PeerClosed { .. }) => Ok(TransitionResult::new(state.clone())),

        (_, Event::Conclude) => Ok(TransitionResult::new(DialogueState::Concluded {
            turns: state.turns(),
        })
        .with_effects(recorded)
        .with_effects(abort_if_generating(state))
        .with_effect(Effect::PersistState)
        .with_effect(Effect::LogHistory)),

        (_, Event::Reject) => Ok(TransitionResult::new(DialogueState::Rejected { reason: None })
            .with_effects(recorded)
            .with_effects(abort_if_generating(state))
            .with_effect(Effect::PersistState)
            .with_effect(Effect::notice("Dialogue rejected by peer"))),
    }
}

fn abort_if_generating(state: &DialogueState) -> Option<Effect> {
    state.is_generating().then_some(Effect::AbortCompletion)
}
