//! Document persistence boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::{CoordinationError, Result};

/// Name of the document every fresh server has content for.
pub const DEMO_DOCUMENT_ID: &str = "demo-document";

/// A persisted document body in its portable stored form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub content: Value,
    pub last_modified: DateTime<Utc>,
}

impl StoredDocument {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            last_modified: Utc::now(),
        }
    }
}

/// External persistence for document bodies. Implementations must tolerate
/// concurrent calls from different connections.
pub trait DocumentStore: Send + Sync {
    fn load(&self, document_id: &str) -> Result<Option<StoredDocument>>;

    fn save(&self, document_id: &str, document: StoredDocument) -> Result<()>;
}

/// In-memory store backing the daemon and the tests.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Store prefilled with a demo document, so a fresh server serves
    /// non-empty content for at least one document name.
    pub fn with_demo_document() -> Self {
        let content = json!({
            "type": "doc",
            "content": [
                {
                    "type": "heading",
                    "attrs": { "level": 1 },
                    "content": [{ "type": "text", "text": "Demo document" }]
                },
                {
                    "type": "paragraph",
                    "content": [{
                        "type": "text",
                        "text": "This document is preloaded from the server store. Open it in a second window to edit together."
                    }]
                }
            ]
        });
        let mut documents = HashMap::new();
        documents.insert(DEMO_DOCUMENT_ID.to_string(), StoredDocument::new(content));
        Self {
            documents: RwLock::new(documents),
        }
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load(&self, document_id: &str) -> Result<Option<StoredDocument>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| CoordinationError::Store("store lock poisoned".to_string()))?;
        Ok(documents.get(document_id).cloned())
    }

    fn save(&self, document_id: &str, document: StoredDocument) -> Result<()> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| CoordinationError::Store("store lock poisoned".to_string()))?;
        documents.insert(document_id.to_string(), document);
        Ok(())
    }
}
