//! Routing for out-of-band client requests

use serde_json::Value;
use tracing::{debug, warn};

use crate::{ClientLink, ConnectionRegistry, Notice, StatelessRequest};

/// Handles stateless messages from clients. The only recognized request is
/// a color lookup; everything else is dropped.
#[derive(Debug, Default)]
pub struct StatelessMessageRouter;

impl StatelessMessageRouter {
    pub fn new() -> Self {
        Self
    }

    /// Parse and answer one raw payload. Returns the reply to push back to
    /// the requesting connection, if any. Unparseable payloads are logged
    /// and dropped; unrecognized message types are ignored silently.
    pub fn handle(
        &self,
        registry: &ConnectionRegistry,
        document_id: &str,
        link: &dyn ClientLink,
        payload: &str,
    ) -> Option<Notice> {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Dropping malformed stateless payload on document {}: {}",
                    document_id, e
                );
                return None;
            }
        };

        match serde_json::from_value::<StatelessRequest>(value) {
            Ok(StatelessRequest::RequestUserColor { user_id }) => {
                // A read-only viewer has no color to broadcast.
                if link.is_read_only() {
                    return None;
                }
                let session = registry.get(document_id, &user_id)?;
                Some(Notice::user_color(&session.user_id, &session.color))
            }
            Err(_) => {
                debug!(
                    "Ignoring unrecognized stateless message on document {}",
                    document_id
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Session;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestLink {
        user_id: String,
        read_only: AtomicBool,
    }

    impl TestLink {
        fn new(user_id: &str, read_only: bool) -> Self {
            Self {
                user_id: user_id.to_string(),
                read_only: AtomicBool::new(read_only),
            }
        }
    }

    impl ClientLink for TestLink {
        fn user_id(&self) -> &str {
            &self.user_id
        }

        fn is_read_only(&self) -> bool {
            self.read_only.load(Ordering::SeqCst)
        }

        fn set_read_only(&self, read_only: bool) {
            self.read_only.store(read_only, Ordering::SeqCst);
        }

        fn send_stateless(&self, _payload: &str) {}
    }

    fn registry_with_alice() -> ConnectionRegistry {
        let mut registry = ConnectionRegistry::new();
        registry.upsert(Session::new("doc", "alice", "#7986CB".to_string()));
        registry
    }

    #[test]
    fn test_color_request_is_answered() {
        let router = StatelessMessageRouter::new();
        let registry = registry_with_alice();
        let link = TestLink::new("alice", false);

        let reply = router.handle(
            &registry,
            "doc",
            &link,
            r#"{"type":"requestUserColor","userId":"alice"}"#,
        );

        assert_eq!(reply, Some(Notice::user_color("alice", "#7986CB")));
    }

    #[test]
    fn test_read_only_requester_gets_no_reply() {
        let router = StatelessMessageRouter::new();
        let registry = registry_with_alice();
        let link = TestLink::new("alice", true);

        let reply = router.handle(
            &registry,
            "doc",
            &link,
            r#"{"type":"requestUserColor","userId":"alice"}"#,
        );

        assert_eq!(reply, None);
    }

    #[test]
    fn test_unknown_user_gets_no_reply() {
        let router = StatelessMessageRouter::new();
        let registry = registry_with_alice();
        let link = TestLink::new("bob", false);

        let reply = router.handle(
            &registry,
            "doc",
            &link,
            r#"{"type":"requestUserColor","userId":"bob"}"#,
        );

        assert_eq!(reply, None);
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let router = StatelessMessageRouter::new();
        let registry = registry_with_alice();
        let link = TestLink::new("alice", false);

        let reply = router.handle(&registry, "doc", &link, "not json at all");

        assert_eq!(reply, None);
    }

    #[test]
    fn test_unrecognized_type_is_ignored() {
        let router = StatelessMessageRouter::new();
        let registry = registry_with_alice();
        let link = TestLink::new("alice", false);

        let reply = router.handle(&registry, "doc", &link, r#"{"type":"ping"}"#);

        assert_eq!(reply, None);
    }
}
