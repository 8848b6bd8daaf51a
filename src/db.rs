//! Database module for the dialogue agent
//!
//! Provides persistence for sessions, their attributes and message history.

mod schema;

pub use schema::*;

use crate::dialogue::SessionAttributes;
use crate::protocol::DialogueMessage;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

const SESSION_COLUMNS: &str = "s.id, s.sender, s.state, s.assistant, s.model, s.created_at, s.updated_at,
     (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) as message_count";

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Session Operations ====================

    /// Create the session if it does not exist yet; an existing session keeps its original peer
    pub fn ensure_session(&self, id: &str, sender: &str) -> DbResult<Session> {
        {
            let conn = self.conn()?;
            let now = Utc::now().to_rfc3339();
            let idle_state = serde_json::to_string(&DialogueState::Idle)?;
            conn.execute(
                "INSERT INTO sessions (id, sender, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(id) DO NOTHING",
                params![id, sender, idle_state, now],
            )?;
        }
        self.get_session(id)
    }

    /// Get session by ID
    pub fn get_session(&self, id: &str) -> DbResult<Session> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s WHERE s.id = ?1"
        ))?;

        stmt.query_row(params![id], parse_session_row)
            .optional()?
            .ok_or_else(|| DbError::SessionNotFound(id.to_string()))
    }

    /// List sessions, most recently active first
    pub fn list_sessions(&self) -> DbResult<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s ORDER BY s.updated_at DESC"
        ))?;

        let rows = stmt.query_map([], parse_session_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Overwrite the persona and model of a session
    pub fn set_attributes(&self, id: &str, attributes: &SessionAttributes) -> DbResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sessions SET assistant = ?1, model = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                attributes.assistant,
                attributes.model,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;

        if updated == 0 {
            return Err(DbError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Update session state
    pub fn update_session_state(&self, id: &str, state: &DialogueState) -> DbResult<()> {
        let conn = self.conn()?;
        let state_json = serde_json::to_string(state)?;

        let updated = conn.execute(
            "UPDATE sessions SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![state_json, Utc::now().to_rfc3339(), id],
        )?;

        if updated == 0 {
            return Err(DbError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Move sessions interrupted mid-completion back to a state that accepts turns.
    ///
    /// Returns the IDs of the sessions that were repaired.
    pub fn recover_interrupted_sessions(&self) -> DbResult<Vec<String>> {
        let conn = self.conn()?;
        let interrupted: Vec<(String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, state FROM sessions WHERE json_extract(state, '$.type') = 'generating'",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let now = Utc::now().to_rfc3339();
        let mut recovered = Vec::with_capacity(interrupted.len());
        for (id, state_json) in interrupted {
            let state: DialogueState = serde_json::from_str(&state_json).unwrap_or_default();
            let settled = serde_json::to_string(&state.settled())?;
            conn.execute(
                "UPDATE sessions SET state = ?1, updated_at = ?2 WHERE id = ?3",
                params![settled, now, id],
            )?;
            recovered.push(id);
        }
        Ok(recovered)
    }

    // ==================== Message Operations ====================

    /// Record a protocol message in the session history
    pub fn add_message(
        &self,
        session_id: &str,
        direction: Direction,
        message: &DialogueMessage,
    ) -> DbResult<StoredMessage> {
        let conn = self.conn()?;
        let now = Utc::now();

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        let payload = serde_json::to_string(&message.payload())?;
        conn.execute(
            "INSERT INTO messages (session_id, sequence_id, direction, schema, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                sequence_id,
                direction.to_string(),
                message.schema(),
                payload,
                now.to_rfc3339(),
            ],
        )?;

        conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), session_id],
        )?;

        Ok(StoredMessage {
            session_id: session_id.to_string(),
            sequence_id,
            direction,
            message: message.clone(),
            created_at: now,
        })
    }

    /// Get the message history of a session in order
    pub fn get_messages(&self, session_id: &str) -> DbResult<Vec<StoredMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, sequence_id, direction, schema, payload, created_at
             FROM messages WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (session_id, sequence_id, direction, schema, payload, created_at) = row?;
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let message: DialogueMessage =
                serde_json::from_value(serde_json::json!({ "schema": schema, "payload": payload }))?;
            messages.push(StoredMessage {
                session_id,
                sequence_id,
                direction: Direction::parse(&direction),
                message,
                created_at: parse_datetime(&created_at),
            });
        }
        Ok(messages)
    }
}

/// Parse a session row from the database
fn parse_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let state_json: String = row.get(2)?;
    let state: DialogueState = serde_json::from_str(&state_json).unwrap_or_default();
    let assistant: Option<String> = row.get(3)?;
    let model: Option<String> = row.get(4)?;

    Ok(Session {
        id: row.get(0)?,
        sender: row.get(1)?,
        state,
        attributes: assistant
            .zip(model)
            .map(|(assistant, model)| SessionAttributes::new(assistant, model)),
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
        message_count: row.get(7)?,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
