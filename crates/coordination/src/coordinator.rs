//! Lifecycle hook facade
//!
//! The external document engine drives connections through a fixed hook
//! sequence: authenticate, connect, load document, connected, then any
//! number of awareness and stateless messages, and finally disconnect with
//! a store pass. `SessionCoordinator` owns all coordination state for those
//! hooks behind one lock, so every hook's mutations are atomic with respect
//! to other hooks and separate coordinator instances stay fully isolated.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    AwarenessState, ClientLink, ColorAllocator, ConnectionRegistry, DocumentHandle,
    DocumentInitCoordinator, DocumentStore, EditorSlotManager, LoadOutcome, Result, Session,
    StatelessMessageRouter, StoredDocument, UserId, USER_COLOR_PALETTE,
};

/// User id assumed when a connection does not identify itself.
pub const ANONYMOUS_USER_ID: &str = "anonymous";

pub const DEFAULT_MAX_EDITORS: usize = 6;
pub const DEFAULT_CONTENT_FRAGMENT: &str = "content";
pub const DEFAULT_SEED_HTML: &str =
    "<h1>Untitled</h1><p>Start writing to bring this document to life.</p>";

/// Tunables for session coordination.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Connections allowed to edit one document at the same time.
    pub max_editors: usize,
    /// Ordered color palette handed out to connected users.
    pub palette: Vec<String>,
    /// Name of the content fragment checked for emptiness and persisted.
    pub content_fragment: String,
    /// Markup handed to the elected initializer of a brand-new document.
    pub seed_html: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_editors: DEFAULT_MAX_EDITORS,
            palette: USER_COLOR_PALETTE.iter().map(|c| c.to_string()).collect(),
            content_fragment: DEFAULT_CONTENT_FRAGMENT.to_string(),
            seed_html: DEFAULT_SEED_HTML.to_string(),
        }
    }
}

/// Identity resolved while authenticating a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: UserId,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    registry: ConnectionRegistry,
    colors: ColorAllocator,
    init: DocumentInitCoordinator,
}

/// Composes the coordination components into the lifecycle hooks invoked by
/// the document engine.
pub struct SessionCoordinator {
    config: CoordinatorConfig,
    slots: EditorSlotManager,
    router: StatelessMessageRouter,
    store: Arc<dyn DocumentStore>,
    state: Arc<RwLock<CoordinatorState>>,
}

impl SessionCoordinator {
    pub fn new(config: CoordinatorConfig, store: Arc<dyn DocumentStore>) -> Self {
        let slots = EditorSlotManager::new(config.max_editors);
        let state = CoordinatorState {
            colors: ColorAllocator::new(config.palette.clone()),
            ..CoordinatorState::default()
        };

        Self {
            config,
            slots,
            router: StatelessMessageRouter::new(),
            store,
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Resolve the connecting user's identity from the request parameters.
    /// A missing or empty `userId` parameter resolves to "anonymous".
    pub async fn on_authenticate(
        &self,
        request_parameters: &HashMap<String, String>,
    ) -> UserIdentity {
        let user_id = request_parameters
            .get("userId")
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| ANONYMOUS_USER_ID.to_string());

        UserIdentity { user_id }
    }

    /// Register the session. A reconnect with the same user id supersedes
    /// the stale session: its color is released before the new one is
    /// allocated, and the fresh session joins the back of the promotion
    /// queue.
    pub async fn on_connect(&self, document_id: &str, user_id: &str) {
        let mut state = self.state.write().await;

        if state.registry.remove(document_id, user_id).is_some() {
            state.colors.release(document_id, user_id);
            debug!(
                "Replacing stale session for user {} on document {}",
                user_id, document_id
            );
        }

        let color = state.colors.allocate(document_id, user_id);
        state
            .registry
            .upsert(Session::new(document_id, user_id, color));
        info!("User {} connected to document {}", user_id, document_id);
    }

    /// Decide whether the established connection may edit and push the
    /// decision to the client. Returns the decision.
    pub async fn connected(&self, document_id: &str, link: &dyn ClientLink) -> bool {
        let mut state = self.state.write().await;
        let can_edit = self
            .slots
            .on_connected(&mut state.registry, document_id, link);

        if !can_edit {
            info!(
                "Document {} is at its editor limit, user {} is read-only",
                document_id,
                link.user_id()
            );
        }
        can_edit
    }

    /// Track client activity and watch for a client reporting that document
    /// seeding finished.
    pub async fn on_awareness_update(&self, document_id: &str, states: &[AwarenessState]) {
        let mut state = self.state.write().await;

        for awareness in states {
            if let Some(user_id) = awareness.user_id() {
                state.registry.touch(document_id, user_id);
            }
        }

        state.init.on_awareness_signal(document_id, states);
    }

    /// Answer an out-of-band request; replies go straight to the sender.
    pub async fn on_stateless(&self, document_id: &str, link: &dyn ClientLink, payload: &str) {
        let state = self.state.read().await;

        if let Some(reply) = self
            .router
            .handle(&state.registry, document_id, link, payload)
        {
            match serde_json::to_string(&reply) {
                Ok(json) => link.send_stateless(&json),
                Err(e) => error!("Failed to serialize stateless reply: {}", e),
            }
        }
    }

    /// Tear down the session, reclaim its color, and hand freed editor
    /// slots to waiting read-only connections. When the document's last
    /// session ends, its coordination state is evicted entirely.
    pub async fn on_disconnect(
        &self,
        document_id: &str,
        user_id: &str,
        links: &[Arc<dyn ClientLink>],
    ) {
        let mut state = self.state.write().await;

        if state.registry.remove(document_id, user_id).is_some() {
            state.colors.release(document_id, user_id);
            info!("User {} disconnected from document {}", user_id, document_id);
        }

        let promoted = self
            .slots
            .on_disconnected(&mut state.registry, document_id, links);
        if !promoted.is_empty() {
            info!(
                "Promoted {} waiting connection(s) on document {}",
                promoted.len(),
                document_id
            );
        }

        if state.registry.is_empty(document_id) {
            state.colors.evict_document(document_id);
            state.init.evict(document_id);
            debug!("Evicted coordination state for document {}", document_id);
        }
    }

    /// Fill an empty document from the store, or run the initialization
    /// handshake when the store has nothing (see `DocumentInitCoordinator`).
    /// Invoked every time a connection attaches to the document; documents
    /// with content pass through untouched.
    pub async fn on_load_document(
        &self,
        document_id: &str,
        doc: &mut dyn DocumentHandle,
    ) -> Result<LoadOutcome> {
        if !doc.is_empty(&self.config.content_fragment) {
            return Ok(LoadOutcome::ContentPresent);
        }

        let stored = self.store.load(document_id)?;

        let mut state = self.state.write().await;
        let CoordinatorState { registry, init, .. } = &mut *state;
        let outcome = init.on_load(
            document_id,
            doc,
            &self.config.content_fragment,
            stored.as_ref().map(|d| &d.content),
            registry.list(document_id),
            &self.config.seed_html,
        )?;

        if outcome == LoadOutcome::MergedStored {
            info!("Document {} loaded from store", document_id);
        }
        Ok(outcome)
    }

    /// Persist the document's content. A conversion failure skips the save
    /// and keeps the previously stored content authoritative; an empty
    /// document is never written over a stored body.
    pub async fn on_store_document(&self, document_id: &str, doc: &dyn DocumentHandle) {
        if doc.is_empty(&self.config.content_fragment) {
            debug!("Document {} has no content to store", document_id);
            return;
        }

        let content = match doc.to_stored(&self.config.content_fragment) {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping store for document {}: {}", document_id, e);
                return;
            }
        };

        if let Err(e) = self.store.save(document_id, StoredDocument::new(content)) {
            error!("Failed to store document {}: {}", document_id, e);
        } else {
            debug!("Stored document {}", document_id);
        }
    }

    /// Sessions of the document in arrival order.
    pub async fn sessions(&self, document_id: &str) -> Vec<Session> {
        self.state.read().await.registry.list(document_id).to_vec()
    }

    pub async fn session(&self, document_id: &str, user_id: &str) -> Option<Session> {
        self.state
            .read()
            .await
            .registry
            .get(document_id, user_id)
            .cloned()
    }

    /// Assigned color for the pair, if the user is connected.
    pub async fn color_of(&self, document_id: &str, user_id: &str) -> Option<String> {
        self.state
            .read()
            .await
            .colors
            .color_of(document_id, user_id)
            .map(str::to_string)
    }

    /// Current initialization status of the document, if any.
    pub async fn init_status(&self, document_id: &str) -> Option<crate::InitStatus> {
        self.state.read().await.init.status(document_id)
    }
}
