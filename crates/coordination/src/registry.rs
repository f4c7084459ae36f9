//! Active session tracking per document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{DocumentId, UserId};

/// One user's active participation in one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub document_id: DocumentId,
    pub user_id: UserId,
    pub color: String,
    pub last_active: DateTime<Utc>,
    pub editable: bool,
}

impl Session {
    pub fn new(document_id: &str, user_id: &str, color: String) -> Self {
        Self {
            document_id: document_id.to_string(),
            user_id: user_id.to_string(),
            color,
            last_active: Utc::now(),
            editable: true,
        }
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn idle_for(&self) -> chrono::Duration {
        Utc::now() - self.last_active
    }
}

/// Sessions per document, kept in arrival order. At most one session exists
/// per (document, user) pair; the arrival order doubles as the promotion
/// queue for read-only connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<DocumentId, Vec<Session>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Insert a session at the back of the document's arrival order. Any
    /// existing session for the same (document, user) pair is replaced, so a
    /// reconnect supersedes the stale connection and rejoins the queue at
    /// the end.
    pub fn upsert(&mut self, session: Session) {
        let rows = self
            .sessions
            .entry(session.document_id.clone())
            .or_default();
        rows.retain(|existing| existing.user_id != session.user_id);
        rows.push(session);
    }

    /// Remove and return the session for the pair. No-op when absent.
    pub fn remove(&mut self, document_id: &str, user_id: &str) -> Option<Session> {
        let rows = self.sessions.get_mut(document_id)?;
        let index = rows.iter().position(|s| s.user_id == user_id)?;
        let removed = rows.remove(index);
        if rows.is_empty() {
            self.sessions.remove(document_id);
        }
        Some(removed)
    }

    /// Sessions of the document in arrival order.
    pub fn list(&self, document_id: &str) -> &[Session] {
        self.sessions
            .get(document_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn list_mut(&mut self, document_id: &str) -> &mut [Session] {
        self.sessions
            .get_mut(document_id)
            .map(Vec::as_mut_slice)
            .unwrap_or(&mut [])
    }

    pub fn get(&self, document_id: &str, user_id: &str) -> Option<&Session> {
        self.list(document_id).iter().find(|s| s.user_id == user_id)
    }

    pub fn get_mut(&mut self, document_id: &str, user_id: &str) -> Option<&mut Session> {
        self.list_mut(document_id)
            .iter_mut()
            .find(|s| s.user_id == user_id)
    }

    /// Refresh the activity timestamp for the pair, if registered.
    pub fn touch(&mut self, document_id: &str, user_id: &str) {
        if let Some(session) = self.get_mut(document_id, user_id) {
            session.touch();
        }
    }

    pub fn editable_count(&self, document_id: &str) -> usize {
        self.list(document_id).iter().filter(|s| s.editable).count()
    }

    pub fn is_empty(&self, document_id: &str) -> bool {
        self.list(document_id).is_empty()
    }
}
