//! # Session Manager
//!
//! Tracks live sessions for capacity enforcement and the `/api/v1/sessions`
//! endpoint. Each session actor republishes its [`SessionSnapshot`] after
//! handling an event; the manager never reaches into a session.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionLimitError {
    #[error("Maximum concurrent sessions reached ({0})")]
    Full(usize),
}

/// Point-in-time view of one session's pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub room: Option<String>,
    pub language: String,
    /// Recognizer link state: idle, connecting, connected or closing
    pub recognizer: &'static str,
    pub recognizer_opens: u64,
    pub recognition_available: bool,
    pub translation_available: bool,
    pub speaking: bool,
    pub buffered_audio_bytes: usize,
    pub audio_bytes_forwarded: u64,
    pub pending_transcript: bool,
    pub translation_in_flight: bool,
    pub queued_segments: usize,
    pub queued_utterances: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Snapshot of a session that has not handled any event yet.
    pub fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            room: None,
            language: String::new(),
            recognizer: "idle",
            recognizer_opens: 0,
            recognition_available: false,
            translation_available: false,
            speaking: false,
            buffered_audio_bytes: 0,
            audio_bytes_forwarded: 0,
            pending_transcript: false,
            translation_in_flight: false,
            queued_segments: 0,
            queued_utterances: 0,
            created_at: now,
            last_activity: now,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionSnapshot>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for a new session, unless `limit` sessions are live.
    pub fn register(&self, session_id: &str, limit: usize) -> Result<(), SessionLimitError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= limit {
            return Err(SessionLimitError::Full(limit));
        }
        sessions.insert(session_id.to_string(), SessionSnapshot::new(session_id));
        Ok(())
    }

    /// Replace a registered session's snapshot. Unknown sessions are ignored.
    pub fn update(&self, snapshot: SessionSnapshot) {
        if let Some(entry) = self.sessions.write().get_mut(&snapshot.session_id) {
            *entry = snapshot;
        }
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// All snapshots, oldest session first.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> = self.sessions.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }
}
