//! Per-document user color assignment

use std::collections::HashMap;

use crate::{DocumentId, UserId};

/// Default palette, ordered by allocation preference. Ten entries keeps
/// every concurrently connected editor on a distinct color under the
/// default editor limit.
pub const USER_COLOR_PALETTE: [&str; 10] = [
    "#7986CB", "#81C784", "#64B5F6", "#FFB74D", "#BA68C8", "#4DB6AC", "#F06292", "#9575CD",
    "#FF8A65", "#4FC3F7",
];

/// Assigns each connected user of a document a color from a fixed ordered
/// palette and reclaims it on disconnect.
#[derive(Debug)]
pub struct ColorAllocator {
    palette: Vec<String>,
    assignments: HashMap<DocumentId, HashMap<UserId, String>>,
}

impl ColorAllocator {
    pub fn new(palette: Vec<String>) -> Self {
        Self {
            palette,
            assignments: HashMap::new(),
        }
    }

    /// Assign the first palette color not held by another user of the same
    /// document. Falls back to the first palette entry when every color is
    /// taken; duplicates are accepted at that point.
    pub fn allocate(&mut self, document_id: &str, user_id: &str) -> String {
        let colors = self
            .assignments
            .entry(document_id.to_string())
            .or_default();

        let color = self
            .palette
            .iter()
            .find(|candidate| {
                !colors
                    .iter()
                    .any(|(holder, held)| holder != user_id && held == *candidate)
            })
            .or_else(|| self.palette.first())
            .cloned()
            .unwrap_or_default();

        colors.insert(user_id.to_string(), color.clone());
        color
    }

    /// Release the user's color so a later connection can take it. No-op if
    /// the user holds none.
    pub fn release(&mut self, document_id: &str, user_id: &str) {
        if let Some(colors) = self.assignments.get_mut(document_id) {
            colors.remove(user_id);
            if colors.is_empty() {
                self.assignments.remove(document_id);
            }
        }
    }

    pub fn color_of(&self, document_id: &str, user_id: &str) -> Option<&str> {
        self.assignments
            .get(document_id)
            .and_then(|colors| colors.get(user_id))
            .map(String::as_str)
    }

    /// Drop every assignment for the document.
    pub fn evict_document(&mut self, document_id: &str) {
        self.assignments.remove(document_id);
    }

    pub fn assigned_count(&self, document_id: &str) -> usize {
        self.assignments
            .get(document_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

impl Default for ColorAllocator {
    fn default() -> Self {
        Self::new(USER_COLOR_PALETTE.iter().map(|c| c.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_distinct_colors() {
        let mut allocator = ColorAllocator::default();

        let first = allocator.allocate("doc", "alice");
        let second = allocator.allocate("doc", "bob");

        assert_eq!(first, "#7986CB");
        assert_eq!(second, "#81C784");
        assert_ne!(first, second);
    }

    #[test]
    fn test_release_makes_color_reusable() {
        let mut allocator = ColorAllocator::default();

        let color = allocator.allocate("doc", "alice");
        allocator.allocate("doc", "bob");
        allocator.release("doc", "alice");

        assert_eq!(allocator.color_of("doc", "alice"), None);
        assert_eq!(allocator.allocate("doc", "carol"), color);
    }

    #[test]
    fn test_exhausted_palette_falls_back_to_first_entry() {
        let mut allocator = ColorAllocator::new(vec!["#111111".to_string(), "#222222".to_string()]);

        allocator.allocate("doc", "u1");
        allocator.allocate("doc", "u2");
        let overflow = allocator.allocate("doc", "u3");

        assert_eq!(overflow, "#111111");
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut allocator = ColorAllocator::default();

        allocator.allocate("doc", "alice");
        allocator.release("doc", "alice");
        allocator.release("doc", "alice");

        assert_eq!(allocator.assigned_count("doc"), 0);
    }

    #[test]
    fn test_documents_are_isolated() {
        let mut allocator = ColorAllocator::default();

        let first = allocator.allocate("doc-a", "alice");
        let second = allocator.allocate("doc-b", "bob");

        assert_eq!(first, second);
    }

    #[test]
    fn test_reallocation_keeps_own_color_available() {
        let mut allocator = ColorAllocator::default();

        let original = allocator.allocate("doc", "alice");
        let again = allocator.allocate("doc", "alice");

        assert_eq!(original, again);
    }

    #[test]
    fn test_evict_document_clears_assignments() {
        let mut allocator = ColorAllocator::default();

        allocator.allocate("doc", "alice");
        allocator.allocate("doc", "bob");
        allocator.evict_document("doc");

        assert_eq!(allocator.assigned_count("doc"), 0);
        assert_eq!(allocator.allocate("doc", "carol"), "#7986CB");
    }
}
