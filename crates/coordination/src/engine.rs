//! Boundary to the external collaborative-document engine
//!
//! The coordinator never looks inside a document. It only asks whether a
//! fragment is empty, merges stored content in, converts content out, and
//! reads or writes metadata keys that clients interpret.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

pub const META_NEEDS_INITIALIZATION: &str = "needsInitialization";
pub const META_WAIT_FOR_INITIALIZATION: &str = "waitForInitialization";
pub const META_REASON: &str = "reason";
pub const META_INITIALIZER_ID: &str = "initializerId";
pub const META_HTML_CONTENT: &str = "htmlContent";

pub const REASON_DOCUMENT_NOT_FOUND: &str = "documentNotFound";

/// Opaque handle to an engine-owned document snapshot. Handles ride inside
/// spawned connection tasks, so implementations must be `Send + Sync`.
pub trait DocumentHandle: Send + Sync {
    /// Whether the named content fragment holds no content yet.
    fn is_empty(&self, fragment: &str) -> bool;

    /// Convert stored content into the engine's native representation and
    /// merge it into the fragment.
    fn apply_stored(&mut self, fragment: &str, content: &Value) -> Result<()>;

    /// Convert the fragment into its portable stored form.
    fn to_stored(&self, fragment: &str) -> Result<Value>;

    fn set_metadata(&mut self, key: &str, value: Value);

    fn metadata(&self, key: &str) -> Option<&Value>;
}

/// One live client connection as the engine exposes it to the coordinator.
/// Sends are best-effort: delivery to a severed socket is indistinguishable
/// from success.
pub trait ClientLink: Send + Sync {
    fn user_id(&self) -> &str;

    fn is_read_only(&self) -> bool;

    fn set_read_only(&self, read_only: bool);

    fn send_stateless(&self, payload: &str);
}

/// One client's presence entry in an awareness update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwarenessState {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub state: Value,
}

impl AwarenessState {
    pub fn new(client_id: String, state: Value) -> Self {
        Self { client_id, state }
    }

    /// Whether this client reports having seeded the document's initial
    /// content.
    pub fn reports_initialized(&self) -> bool {
        self.state
            .get("documentInitialized")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The user this presence entry belongs to, if the client included one.
    pub fn user_id(&self) -> Option<&str> {
        self.state.get("userId").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reports_initialized_requires_true() {
        let yes = AwarenessState::new("c1".to_string(), json!({ "documentInitialized": true }));
        let no = AwarenessState::new("c2".to_string(), json!({ "documentInitialized": false }));
        let absent = AwarenessState::new("c3".to_string(), json!({ "cursor": 4 }));

        assert!(yes.reports_initialized());
        assert!(!no.reports_initialized());
        assert!(!absent.reports_initialized());
    }

    #[test]
    fn test_user_id_read_from_state() {
        let state = AwarenessState::new("c1".to_string(), json!({ "userId": "alice" }));

        assert_eq!(state.user_id(), Some("alice"));
        assert_eq!(
            AwarenessState::new("c2".to_string(), Value::Null).user_id(),
            None
        );
    }
}
