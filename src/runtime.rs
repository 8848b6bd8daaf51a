//! Runtime for executing dialogue sessions
//!
//! One task per session, fed by an mpsc channel, so a session's messages are
//! handled strictly in arrival order while other sessions proceed concurrently.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::db::{Database, DbError};
use crate::dialogue::{DialogueContext, Event, InboundError};
use crate::llm::LlmService;
use crate::protocol::Envelope;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime = SessionRuntime<DatabaseStorage, ServiceLlmClient, Arc<dyn Transport>>;

/// Default bound on a single completion call
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Invalid message: {0}")]
    Inbound(#[from] InboundError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Session {session_id} belongs to a different peer")]
    PeerMismatch { session_id: String },
    #[error("Session queue is full: {0}")]
    QueueFull(String),
    #[error("Session runtime unavailable: {0}")]
    ChannelClosed(String),
}

/// Settings shared by every session runtime
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// This agent's address, used as the sender of replies
    pub agent_address: String,
    pub completion_timeout: Duration,
    pub strict_models: bool,
}

/// Live runtimes by session id
///
/// A runtime removes its own entry when it retires, under the write lock.
pub type SessionRegistry = Arc<RwLock<HashMap<String, SessionHandle>>>;

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    /// The only address allowed to speak in this session
    pub peer: String,
    pub event_tx: mpsc::Sender<Event>,
}

impl SessionHandle {
    /// Queue an event without waiting; callers hold the registry lock
    fn enqueue(&self, session_id: &str, sender: &str, event: Event) -> Result<(), RuntimeError> {
        if self.peer != sender {
            return Err(RuntimeError::PeerMismatch {
                session_id: session_id.to_string(),
            });
        }
        self.event_tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => RuntimeError::QueueFull(session_id.to_string()),
            TrySendError::Closed(_) => RuntimeError::ChannelClosed(session_id.to_string()),
        })
    }
}

/// Manager for all session runtimes
pub struct RuntimeManager {
    db: Database,
    llm: Arc<dyn LlmService>,
    transport: Arc<dyn Transport>,
    settings: RuntimeSettings,
    runtimes: SessionRegistry,
}

impl RuntimeManager {
    pub fn new(
        db: Database,
        llm: Arc<dyn LlmService>,
        transport: Arc<dyn Transport>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            db,
            llm,
            transport,
            settings,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Route an inbound envelope to its session
    pub async fn submit(&self, envelope: Envelope) -> Result<(), RuntimeError> {
        let Envelope {
            sender,
            session,
            message,
            ..
        } = envelope;
        let schema = message.schema();
        let event = Event::try_from(message)?;

        tracing::debug!(session_id = %session, sender = %sender, schema, "Inbound message");
        self.send_event(&session, &sender, event).await
    }

    /// Send an event to a session, starting its runtime if none is live
    pub async fn send_event(
        &self,
        session_id: &str,
        sender: &str,
        event: Event,
    ) -> Result<(), RuntimeError> {
        // Enqueue under the read lock so a retiring runtime sees the event
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(session_id) {
                return handle.enqueue(session_id, sender, event);
            }
        }

        let mut runtimes = self.runtimes.write().await;
        if let Some(handle) = runtimes.get(session_id) {
            return handle.enqueue(session_id, sender, event);
        }

        let handle = self.spawn(session_id, sender)?;
        handle.enqueue(session_id, sender, event)?;
        runtimes.insert(session_id.to_string(), handle);
        Ok(())
    }

    /// Start a runtime for a session; the caller holds the registry write lock
    fn spawn(&self, session_id: &str, sender: &str) -> Result<SessionHandle, RuntimeError> {
        let session = self.db.ensure_session(session_id, sender)?;
        if session.sender != sender {
            return Err(RuntimeError::PeerMismatch {
                session_id: session_id.to_string(),
            });
        }

        let context = DialogueContext::new(&session.id, &session.sender, &self.settings.agent_address)
            .with_strict_models(self.settings.strict_models);

        let (event_tx, event_rx) = mpsc::channel(32);

        let runtime: ProductionRuntime = SessionRuntime::new(
            context,
            session.state,
            DatabaseStorage::new(self.db.clone()),
            ServiceLlmClient::new(self.llm.clone()),
            self.transport.clone(),
            event_rx,
            &event_tx,
            self.settings.completion_timeout,
        )
        .with_registry(self.runtimes.clone());

        let sid = session_id.to_string();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(session_id = %sid, "Session runtime finished");
        });

        Ok(SessionHandle {
            peer: session.sender,
            event_tx,
        })
    }

    /// Number of sessions with a live runtime
    pub async fn active_sessions(&self) -> usize {
        self.runtimes.read().await.len()
    }

    /// Get the database handle
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn agent_address(&self) -> &str {
        &self.settings.agent_address
    }

    pub fn strict_models(&self) -> bool {
        self.settings.strict_models
    }
}
