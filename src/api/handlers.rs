//! HTTP request handlers

use super::types::{
    ErrorResponse, ModelsResponse, SessionListResponse, SessionWithMessagesResponse,
    SubmitResponse,
};
use super::AppState;
use crate::db::DbError;
use crate::identity::AgentIdentity;
use crate::llm::all_models;
use crate::protocol::{self, Envelope};
use crate::runtime::RuntimeError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Inbound mailbox
        .route("/submit", post(submit))
        // Session views
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", get(get_session))
        // Agent description
        .route("/models", get(list_models))
        .route("/manifest", get(get_manifest))
        .route("/address", get(get_address))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Inbound Envelopes
// ============================================================

async fn submit(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let envelope: Envelope = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(format!("Malformed envelope: {e}")))?;

    if !envelope.target.is_empty() && envelope.target != state.runtime.agent_address() {
        return Err(AppError::BadRequest(format!(
            "Envelope addressed to {}, not this agent",
            envelope.target
        )));
    }

    let session = envelope.session.clone();
    state.runtime.submit(envelope).await.map_err(|e| match e {
        RuntimeError::Inbound(_) | RuntimeError::PeerMismatch { .. } => {
            AppError::BadRequest(e.to_string())
        }
        RuntimeError::QueueFull(_) => {
            tracing::warn!(session_id = %session, "Session queue full, refusing envelope");
            AppError::Unavailable(e.to_string())
        }
        RuntimeError::Db(_) | RuntimeError::ChannelClosed(_) => {
            tracing::error!(session_id = %session, error = %e, "Failed to route envelope");
            AppError::Internal(e.to_string())
        }
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            queued: true,
            session,
        }),
    ))
}

// ============================================================
// Session Views
// ============================================================

async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<SessionListResponse>, AppError> {
    let sessions = state
        .runtime
        .db()
        .list_sessions()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(SessionListResponse {
        sessions,
        active: state.runtime.active_sessions().await,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionWithMessagesResponse>, AppError> {
    let session = state.runtime.db().get_session(&id).map_err(|e| match e {
        DbError::SessionNotFound(_) => AppError::NotFound(e.to_string()),
        _ => AppError::Internal(e.to_string()),
    })?;

    let messages = state
        .runtime
        .db()
        .get_messages(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(SessionWithMessagesResponse {
        generating: session.is_generating(),
        session,
        messages,
    }))
}

// ============================================================
// Agent Description
// ============================================================

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: all_models(),
        strict: state.runtime.strict_models(),
    })
}

async fn get_manifest() -> Json<Value> {
    Json(protocol::manifest())
}

async fn get_address(State(state): State<AppState>) -> Json<AgentIdentity> {
    Json(state.identity.clone())
}

async fn get_version() -> &'static str {
    concat!("chitchat-agent ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
