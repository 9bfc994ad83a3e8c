//! Registry of live sessions.
//!
//! Tracks every connected session and enforces the concurrent-session limit.
//! Session state itself lives in each session's own task; the registry only
//! holds bookkeeping, so no session can reach into another.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub opened_at: DateTime<Utc>,
    /// Remote address of the client, if known.
    pub peer: Option<String>,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    max_concurrent_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
        }
    }

    /// Reserve a slot for a new session.
    ///
    /// ## Returns:
    /// - **Ok(session_id)**: slot reserved
    /// - **Err(AppError::Unavailable)**: the session limit is reached
    pub fn register(&self, peer: Option<String>) -> AppResult<Uuid> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(AppError::Unavailable(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            )));
        }

        let session_id = Uuid::new_v4();
        sessions.insert(
            session_id,
            SessionEntry {
                opened_at: Utc::now(),
                peer,
            },
        );
        Ok(session_id)
    }

    /// Release a session's slot, returning its entry if it was registered.
    pub fn remove(&self, session_id: &Uuid) -> Option<SessionEntry> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn capacity(&self) -> usize {
        self.max_concurrent_sessions
    }

    pub fn is_full(&self) -> bool {
        self.active_count() >= self.max_concurrent_sessions
    }
}
