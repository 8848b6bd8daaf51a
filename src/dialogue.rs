//! Dialogue session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::{Event, InboundError};
pub use state::{DialogueContext, DialogueState, ErrorKind, SessionAttributes};
pub use transition::transition;
