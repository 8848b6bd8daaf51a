//! Database schema and types

pub use crate::dialogue::DialogueState;
use crate::dialogue::SessionAttributes;
use crate::protocol::DialogueMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL schema for initialization
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    sender TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT '{"type":"idle"}',
    assistant TEXT,
    model TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    session_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    direction TEXT NOT NULL,
    schema TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (session_id, sequence_id),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);
"#;

/// Session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Peer address replies are delivered to
    pub sender: String,
    pub state: DialogueState,
    /// Persona and model from the latest initiation
    pub attributes: Option<SessionAttributes>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
}

impl Session {
    /// Check if a completion is in flight
    pub fn is_generating(&self) -> bool {
        self.state.is_generating()
    }
}

/// Which way a recorded message travelled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

impl Direction {
    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "outbound" => Direction::Outbound,
            _ => Direction::Inbound,
        }
    }
}

/// One recorded protocol message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub session_id: String,
    pub sequence_id: i64,
    pub direction: Direction,
    pub message: DialogueMessage,
    pub created_at: DateTime<Utc>,
}
