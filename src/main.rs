//! `ChitChatDialogue` agent
//!
//! Accepts dialogue sessions from peer agents and answers each user turn
//! with a completion from the Groq API, in the persona the peer asked for.

mod api;
mod completion;
mod config;
mod db;
mod dialogue;
mod identity;
mod llm;
mod protocol;
mod runtime;
mod transport;

use api::{create_router, AppState};
use config::AgentConfig;
use db::Database;
use identity::AgentIdentity;
use llm::{GroqService, LoggingService};
use runtime::{RuntimeManager, RuntimeSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::MailboxTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chitchat_agent=debug,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AgentConfig::from_env()?;

    let identity = AgentIdentity::new(&config.agent_name, config.agent_seed.as_deref());
    println!("Agent address: {}", identity.address);
    tracing::info!(name = %identity.name, address = %identity.address, "Agent identity");

    if config.groq_api_key.is_empty() {
        tracing::warn!("GROQ_API_KEY is not set; every completion will fail with an auth error");
    }
    if config.mailbox_key.is_none() {
        tracing::warn!("CHITCHAT_MAILBOX_KEY is not set; replies are submitted unauthenticated");
    }

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    // Completions in flight at shutdown never finished
    let recovered = db.recover_interrupted_sessions()?;
    if !recovered.is_empty() {
        tracing::info!(sessions = ?recovered, "Recovered interrupted sessions");
    }

    let groq = GroqService::new(config.groq_api_key.clone(), Some(config.groq_base_url.as_str()))?;
    let llm = Arc::new(LoggingService::new(Arc::new(groq)));
    let transport = Arc::new(MailboxTransport::new(
        &config.mailbox_url,
        config.mailbox_key.clone(),
    )?);

    let runtime = RuntimeManager::new(
        db,
        llm,
        transport,
        RuntimeSettings {
            agent_address: identity.address.clone(),
            completion_timeout: config.completion_timeout,
            strict_models: config.strict_models,
        },
    );
    let state = AppState::new(runtime, identity);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Agent listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
