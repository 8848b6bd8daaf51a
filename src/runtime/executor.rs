//! Session runtime executor

use super::traits::{LlmClient, Storage, Transport};
use super::SessionRegistry;
use crate::completion::generate_response;
use crate::db::Direction;
use crate::dialogue::{transition, DialogueContext, DialogueState, Effect, ErrorKind, Event};
use crate::protocol::{DialogueMessage, Envelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Generic session runtime that can work with any storage, LLM, and transport implementations
pub struct SessionRuntime<S, L, T>
where
    S: Storage + Clone + 'static,
    L: LlmClient + 'static,
    T: Transport + 'static,
{
    context: DialogueContext,
    state: DialogueState,
    storage: S,
    llm_client: Arc<L>,
    transport: Arc<T>,
    event_rx: mpsc::Receiver<Event>,
    /// Weak so that completion tasks never keep the queue open
    event_tx: mpsc::WeakSender<Event>,
    completion_timeout: Duration,
    /// Token to cancel the running completion
    completion_cancel_token: Option<CancellationToken>,
    /// Registry to leave when the session goes dormant
    registry: Option<SessionRegistry>,
}

/// Outcome of an attempt to leave the registry
enum Retire {
    Done,
    Pending(Event),
    Unmanaged,
}

impl<S, L, T> SessionRuntime<S, L, T>
where
    S: Storage + Clone + 'static,
    L: LlmClient + 'static,
    T: Transport + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: DialogueContext,
        state: DialogueState,
        storage: S,
        llm_client: L,
        transport: T,
        event_rx: mpsc::Receiver<Event>,
        event_tx: &mpsc::Sender<Event>,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            context,
            state,
            storage,
            llm_client: Arc::new(llm_client),
            transport: Arc::new(transport),
            event_rx,
            event_tx: event_tx.downgrade(),
            completion_timeout,
            completion_cancel_token: None,
            registry: None,
        }
    }

    /// Retire from `registry` once the session is dormant and nothing is queued
    pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.context.session_id, state = self.state.name(), "Starting session runtime");

        // A completion cannot survive a restart; the turn is abandoned
        if self.state.is_generating() {
            tracing::info!(session_id = %self.context.session_id, "Abandoning interrupted completion");
            self.state = self.state.settled();
            if let Err(e) = self.execute_effect(Effect::PersistState).await {
                tracing::error!(error = %e, "Failed to persist recovered state");
            }
        }

        // Process events in a loop - no recursion
        let mut pending = None;
        loop {
            let event = match pending.take() {
                Some(event) => event,
                None => match self.event_rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Err(e) = self.process_event(event).await {
                tracing::warn!(session_id = %self.context.session_id, error = %e, "Error handling event");
            }

            if self.state.is_dormant() {
                match self.try_retire().await {
                    Retire::Done => {
                        tracing::debug!(session_id = %self.context.session_id, state = self.state.name(), "Session dormant, retiring runtime");
                        break;
                    }
                    Retire::Pending(event) => pending = Some(event),
                    Retire::Unmanaged => {}
                }
            }
        }

        tracing::info!(session_id = %self.context.session_id, "Session runtime stopped");
    }

    /// Senders enqueue under the registry read lock, so an empty queue seen
    /// under the write lock stays empty once the entry is gone
    async fn try_retire(&mut self) -> Retire {
        let Some(registry) = self.registry.clone() else {
            return Retire::Unmanaged;
        };
        let mut runtimes = registry.write().await;
        match self.event_rx.try_recv() {
            Ok(event) => Retire::Pending(event),
            Err(_) => {
                runtimes.remove(&self.context.session_id);
                Retire::Done
            }
        }
    }

    async fn process_event(&mut self, event: Event) -> Result<(), String> {
        // Effects can generate follow-up events (delivery outcomes)
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            let inbound = current_event.inbound_message();
            let result = match transition(&self.state, &self.context, current_event) {
                Ok(r) => r,
                Err(e) => {
                    // Illegal inputs are recorded and answered, never silently dropped
                    if let Some(message) = inbound {
                        self.execute_effect(Effect::RecordInbound { message }).await?;
                    }
                    let reply = Effect::Deliver {
                        message: DialogueMessage::error(e.to_string(), e.error_kind()),
                        conclude_on_close: false,
                    };
                    self.execute_effect(reply).await?;
                    return Err(e.to_string());
                }
            };

            let old_state = std::mem::replace(&mut self.state, result.new_state);
            if old_state.name() != self.state.name() {
                tracing::debug!(
                    session_id = %self.context.session_id,
                    from = old_state.name(),
                    to = self.state.name(),
                    inbound = inbound.is_some(),
                    "State transition"
                );
            }

            for effect in result.effects {
                if let Some(generated_event) = self.execute_effect(effect).await? {
                    events_to_process.push(generated_event);
                }
            }
        }

        Ok(())
    }

    /// Execute an effect and optionally return a generated event
    async fn execute_effect(&mut self, effect: Effect) -> Result<Option<Event>, String> {
        match effect {
            Effect::RecordInbound { message } => {
                self.storage
                    .add_message(&self.context.session_id, Direction::Inbound, &message)
                    .await?;
                Ok(None)
            }

            Effect::PersistAttributes { attributes } => {
                self.storage
                    .set_attributes(&self.context.session_id, &attributes)
                    .await?;
                Ok(None)
            }

            Effect::PersistState => {
                self.storage
                    .update_state(&self.context.session_id, &self.state)
                    .await?;
                Ok(None)
            }

            Effect::Deliver {
                message,
                conclude_on_close,
            } => {
                self.storage
                    .add_message(&self.context.session_id, Direction::Outbound, &message)
                    .await?;

                let schema = message.schema();
                let envelope = Envelope::new(
                    &self.context.agent_address,
                    &self.context.peer,
                    &self.context.session_id,
                    message,
                );

                match self.transport.deliver(&envelope).await {
                    Ok(()) => {
                        tracing::debug!(session_id = %self.context.session_id, schema, "Reply delivered");
                        Ok(Some(Event::ReplyDelivered))
                    }
                    Err(e) if e.is_closed() && conclude_on_close => {
                        tracing::info!(session_id = %self.context.session_id, error = %e, "Peer stream closed, concluding");
                        Ok(Some(Event::PeerClosed { message: e.message }))
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %self.context.session_id, schema, error = %e, "Failed to deliver reply");
                        Ok(None)
                    }
                }
            }

            Effect::RequestCompletion {
                turn_id,
                persona,
                user_message,
                model,
            } => {
                self.context.next_turn_id = turn_id + 1;
                let cancel_token = CancellationToken::new();
                self.completion_cancel_token = Some(cancel_token.clone());

                let llm_client = self.llm_client.clone();
                let event_tx = self.event_tx.clone();
                let timeout = self.completion_timeout;
                let session_id = self.context.session_id.clone();

                tokio::spawn(async move {
                    tracing::info!(session_id = %session_id, turn_id, model = %model, "Requesting completion (background)");

                    // Race the bounded completion against cancellation
                    tokio::select! {
                        biased;

                        () = cancel_token.cancelled() => {
                            tracing::info!(session_id = %session_id, "Completion cancelled");
                        }

                        result = tokio::time::timeout(
                            timeout,
                            generate_response(&*llm_client, &persona, &user_message, &model),
                        ) => {
                            let event = match result {
                                Ok(Ok(text)) => Event::CompletionReady { turn_id, text },
                                Ok(Err(e)) => Event::CompletionFailed {
                                    turn_id,
                                    message: e.message,
                                    error_kind: ErrorKind::from(e.kind),
                                },
                                Err(_) => Event::CompletionFailed {
                                    turn_id,
                                    message: format!(
                                        "Completion timed out after {}s",
                                        timeout.as_secs_f64()
                                    ),
                                    error_kind: ErrorKind::UpstreamTimeout,
                                },
                            };
                            if let Some(event_tx) = event_tx.upgrade() {
                                let _ = event_tx.send(event).await;
                            }
                        }
                    }
                });

                // The outcome arrives as an event from the spawned task
                Ok(None)
            }

            Effect::AbortCompletion => {
                tracing::info!(session_id = %self.context.session_id, "Aborting completion");
                if let Some(token) = self.completion_cancel_token.take() {
                    token.cancel();
                }
                Ok(None)
            }

            Effect::LogHistory => {
                let messages = self.storage.get_messages(&self.context.session_id).await?;
                tracing::info!(
                    session_id = %self.context.session_id,
                    peer = %self.context.peer,
                    count = messages.len(),
                    "Dialogue concluded"
                );
                for stored in &messages {
                    tracing::info!(
                        session_id = %self.context.session_id,
                        sequence_id = stored.sequence_id,
                        direction = %stored.direction,
                        schema = stored.message.schema(),
                        payload = %stored.message.payload(),
                        "Dialogue history"
                    );
                }
                Ok(None)
            }

            Effect::Notice { message } => {
                tracing::info!(session_id = %self.context.session_id, peer = %self.context.peer, "{message}");
                Ok(None)
            }
        }
    }
}
