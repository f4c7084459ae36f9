//! Concurrent-editor limit enforcement

use std::sync::Arc;
use tracing::error;

use crate::{ClientLink, ConnectionRegistry, Notice, UserId};

/// Enforces the per-document editor limit. The connection registry is the
/// single source for connection counts; arrival order is the promotion
/// queue.
#[derive(Debug, Clone)]
pub struct EditorSlotManager {
    max_editors: usize,
}

impl EditorSlotManager {
    pub fn new(max_editors: usize) -> Self {
        Self { max_editors }
    }

    pub fn max_editors(&self) -> usize {
        self.max_editors
    }

    /// Decide whether a newly established connection may edit. Counts the
    /// document's editable sessions registered ahead of the connecting
    /// user's own row; when every slot is taken the connection is demoted to
    /// read-only. Counting only rows ahead keeps admission a function of
    /// arrival order, so a registered connection whose own decision has not
    /// run yet never costs an earlier arrival its slot. The decision is
    /// pushed to the client as a single notice.
    pub fn on_connected(
        &self,
        registry: &mut ConnectionRegistry,
        document_id: &str,
        link: &dyn ClientLink,
    ) -> bool {
        let editable_ahead = registry
            .list(document_id)
            .iter()
            .take_while(|s| s.user_id != link.user_id())
            .filter(|s| s.editable)
            .count();
        let can_edit = editable_ahead < self.max_editors;

        if let Some(session) = registry.get_mut(document_id, link.user_id()) {
            session.editable = can_edit;
        }
        link.set_read_only(!can_edit);

        let notice = if can_edit {
            Notice::can_edit()
        } else {
            Notice::max_users_exceeded(self.max_editors)
        };
        send_notice(link, &notice);

        can_edit
    }

    /// Fill slots freed by a disconnect. Walks the document's sessions in
    /// arrival order and flips the first freed read-only connections to
    /// editable (first registered, first promoted), notifying each promoted
    /// client. Returns the promoted user ids.
    pub fn on_disconnected(
        &self,
        registry: &mut ConnectionRegistry,
        document_id: &str,
        links: &[Arc<dyn ClientLink>],
    ) -> Vec<UserId> {
        let editable = registry.editable_count(document_id);
        let freed = self.max_editors.saturating_sub(editable);
        if freed == 0 {
            return Vec::new();
        }

        let mut promoted = Vec::new();
        for session in registry.list_mut(document_id) {
            if promoted.len() == freed {
                break;
            }
            if session.editable {
                continue;
            }
            session.editable = true;
            promoted.push(session.user_id.clone());
        }

        for user_id in &promoted {
            if let Some(link) = links.iter().find(|l| l.user_id() == user_id) {
                link.set_read_only(false);
                send_notice(link.as_ref(), &Notice::can_edit());
            }
        }

        promoted
    }
}

fn send_notice(link: &dyn ClientLink, notice: &Notice) {
    match serde_json::to_string(notice) {
        Ok(json) => link.send_stateless(&json),
        Err(e) => error!("Failed to serialize notice: {}", e),
    }
}
