//! HTTP API for the dialogue agent
//!
//! `/submit` is the inbound mailbox endpoint; the rest are read-only views
//! of sessions and of the agent itself.

mod handlers;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::identity::AgentIdentity;
use crate::runtime::RuntimeManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeManager>,
    pub identity: AgentIdentity,
}

impl AppState {
    pub fn new(runtime: RuntimeManager, identity: AgentIdentity) -> Self {
        Self {
            runtime: Arc::new(runtime),
            identity,
        }
    }
}
