//! First-access initialization handshake
//!
//! When a document is opened and neither the engine nor the store has any
//! content for it, exactly one connected user must seed the initial content.
//! A per-document status machine arbitrates the race between clients that
//! open the document at the same time.

use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::{
    AwarenessState, DocumentHandle, DocumentId, Result, Session, UserId, META_HTML_CONTENT,
    META_INITIALIZER_ID, META_NEEDS_INITIALIZATION, META_REASON, META_WAIT_FOR_INITIALIZATION,
    REASON_DOCUMENT_NOT_FOUND,
};

/// Initialization progress of a document. A document with no entry has
/// never been seen empty ("absent" state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Initializing,
    Initialized,
}

/// What loading an empty document decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The content fragment already has content; nothing to do.
    ContentPresent,
    /// Stored content was merged into the document.
    MergedStored,
    /// Another replica already finished seeding; content arrives via merge.
    AlreadyInitialized,
    /// Someone else is seeding right now; the client should wait.
    WaitForInitializer,
    /// This document is brand new; the named user seeds it.
    ElectedInitializer(UserId),
    /// Empty document with nobody connected. Log-only race with disconnect.
    NoParticipants,
}

/// Per-document initialization status machine. Transitions only move
/// forward: absent, then initializing, then initialized.
#[derive(Debug, Default)]
pub struct DocumentInitCoordinator {
    status: HashMap<DocumentId, InitStatus>,
}

impl DocumentInitCoordinator {
    pub fn new() -> Self {
        Self {
            status: HashMap::new(),
        }
    }

    pub fn status(&self, document_id: &str) -> Option<InitStatus> {
        self.status.get(document_id).copied()
    }

    /// Handle a document whose content fragment is empty. Merges stored
    /// content when the store has any, otherwise arbitrates who seeds the
    /// document: the first arrival-ordered participant is elected and told
    /// to initialize, everyone after it is told to wait.
    pub fn on_load(
        &mut self,
        document_id: &str,
        doc: &mut dyn DocumentHandle,
        fragment: &str,
        stored: Option<&Value>,
        participants: &[Session],
        seed_html: &str,
    ) -> Result<LoadOutcome> {
        if let Some(content) = stored {
            doc.apply_stored(fragment, content)?;
            return Ok(LoadOutcome::MergedStored);
        }

        match self.status.get(document_id) {
            Some(InitStatus::Initialized) => Ok(LoadOutcome::AlreadyInitialized),

            Some(InitStatus::Initializing) => {
                doc.set_metadata(META_NEEDS_INITIALIZATION, Value::Bool(false));
                doc.set_metadata(META_WAIT_FOR_INITIALIZATION, Value::Bool(true));
                Ok(LoadOutcome::WaitForInitializer)
            }

            None => match participants.first() {
                Some(session) => {
                    doc.set_metadata(META_NEEDS_INITIALIZATION, Value::Bool(true));
                    doc.set_metadata(
                        META_REASON,
                        Value::String(REASON_DOCUMENT_NOT_FOUND.to_string()),
                    );
                    doc.set_metadata(
                        META_INITIALIZER_ID,
                        Value::String(session.user_id.clone()),
                    );
                    doc.set_metadata(META_HTML_CONTENT, Value::String(seed_html.to_string()));
                    self.status
                        .insert(document_id.to_string(), InitStatus::Initializing);
                    info!(
                        "Elected user {} to initialize document {}",
                        session.user_id, document_id
                    );
                    Ok(LoadOutcome::ElectedInitializer(session.user_id.clone()))
                }
                None => {
                    warn!(
                        "Document {} is empty but has no connected users to initialize it",
                        document_id
                    );
                    Ok(LoadOutcome::NoParticipants)
                }
            },
        }
    }

    /// Scan an awareness batch for a client reporting that seeding finished.
    /// The first reporter wins; the rest of the batch is not scanned. Marking
    /// an already-initialized document again is a no-op.
    pub fn on_awareness_signal(&mut self, document_id: &str, states: &[AwarenessState]) -> bool {
        for state in states {
            if state.reports_initialized() {
                let previous = self
                    .status
                    .insert(document_id.to_string(), InitStatus::Initialized);
                if previous != Some(InitStatus::Initialized) {
                    debug!("Document {} reported initialized", document_id);
                }
                return true;
            }
        }
        false
    }

    /// Drop the document's status entry once it has no participants left.
    pub fn evict(&mut self, document_id: &str) {
        self.status.remove(document_id);
    }
}
