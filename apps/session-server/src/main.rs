//! Session coordination WebSocket server
//! Hosts shared documents, relays updates and awareness between connected
//! clients, and drives the coordination hooks over each connection's
//! lifecycle. Clients connect to ws://host/<document-id>?userId=<id>.

use chrono::{DateTime, Utc};
use coordination::*;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type Tx = mpsc::UnboundedSender<Message>;
type RoomMap = Arc<RwLock<HashMap<String, Room>>>;

const DEFAULT_PORT: u16 = 9800;
const STORE_INTERVAL_SECS: u64 = 30;

/// Frames exchanged with clients as JSON text messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum SessionMessage {
    /// Full document state pushed to a client right after it attaches.
    #[serde(rename = "document")]
    Document {
        content: Value,
        metadata: HashMap<String, Value>,
    },

    /// Content replacement for the document's content fragment.
    #[serde(rename = "update")]
    Update { content: Value },

    /// One client's presence state.
    #[serde(rename = "awareness")]
    Awareness {
        #[serde(
            rename = "clientId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        client_id: Option<String>,
        state: Value,
    },

    /// Out-of-band payload, forwarded verbatim to the coordination layer.
    #[serde(rename = "stateless")]
    Stateless { payload: String },
}

/// Server-hosted document: named content fragments plus metadata the
/// coordination layer writes for clients to interpret. Updates replace the
/// content fragment wholesale (last write wins).
struct HostedDocument {
    fragments: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
}

impl HostedDocument {
    fn new() -> Self {
        Self {
            fragments: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    fn replace_fragment(&mut self, fragment: &str, content: Value) {
        self.fragments.insert(fragment.to_string(), content);
    }

    fn fragment(&self, fragment: &str) -> Value {
        self.fragments.get(fragment).cloned().unwrap_or(Value::Null)
    }

    fn metadata_snapshot(&self) -> HashMap<String, Value> {
        self.metadata.clone()
    }
}

impl DocumentHandle for HostedDocument {
    fn is_empty(&self, fragment: &str) -> bool {
        match self.fragments.get(fragment) {
            None | Some(Value::Null) => true,
            Some(Value::Object(map)) => map.is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::String(text)) => text.is_empty(),
            Some(_) => false,
        }
    }

    fn apply_stored(&mut self, fragment: &str, content: &Value) -> coordination::Result<()> {
        if content.is_null() {
            return Err(CoordinationError::Conversion(
                "stored content is null".to_string(),
            ));
        }
        self.fragments.insert(fragment.to_string(), content.clone());
        Ok(())
    }

    fn to_stored(&self, fragment: &str) -> coordination::Result<Value> {
        self.fragments.get(fragment).cloned().ok_or_else(|| {
            CoordinationError::Conversion(format!("document has no '{}' fragment", fragment))
        })
    }

    fn set_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// One connected client.
struct ConnectionHandle {
    client_id: String,
    user_id: String,
    read_only: AtomicBool,
    tx: Tx,
}

impl ClientLink for ConnectionHandle {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn send_stateless(&self, payload: &str) {
        let frame = SessionMessage::Stateless {
            payload: payload.to_string(),
        };
        match serde_json::to_string(&frame) {
            Ok(json) => {
                let _ = self.tx.send(Message::Text(json));
            }
            Err(e) => error!("Failed to serialize stateless frame: {}", e),
        }
    }
}

/// Per-document server state.
struct Room {
    doc: HostedDocument,
    connections: Vec<Arc<ConnectionHandle>>,
    awareness: HashMap<String, Value>,
    created_at: DateTime<Utc>,
}

impl Room {
    fn new() -> Self {
        Self {
            doc: HostedDocument::new(),
            connections: Vec::new(),
            awareness: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    fn broadcast(&self, msg: &SessionMessage, exclude_client: Option<&str>) {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                return;
            }
        };

        for conn in &self.connections {
            if Some(conn.client_id.as_str()) == exclude_client {
                continue;
            }

            if let Err(e) = conn.tx.send(Message::Text(json.clone())) {
                error!("Failed to send to client {}: {}", conn.client_id, e);
            }
        }
    }

    fn links(&self) -> Vec<Arc<dyn ClientLink>> {
        self.connections
            .iter()
            .map(|conn| conn.clone() as Arc<dyn ClientLink>)
            .collect()
    }

    fn awareness_states(&self) -> Vec<AwarenessState> {
        self.awareness
            .iter()
            .map(|(client_id, state)| AwarenessState::new(client_id.clone(), state.clone()))
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("session_server=debug,coordination=debug")
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Session server listening on: {}", addr);

    let store = Arc::new(MemoryDocumentStore::with_demo_document());
    let coordinator = Arc::new(SessionCoordinator::new(CoordinatorConfig::default(), store));
    let rooms: RoomMap = Arc::new(RwLock::new(HashMap::new()));

    tokio::spawn(store_sweep(coordinator.clone(), rooms.clone()));

    while let Ok((stream, addr)) = listener.accept().await {
        info!("New connection from: {}", addr);
        tokio::spawn(handle_connection(
            stream,
            addr,
            coordinator.clone(),
            rooms.clone(),
        ));
    }

    Ok(())
}

/// Periodically persist every open document.
async fn store_sweep(coordinator: Arc<SessionCoordinator>, rooms: RoomMap) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(STORE_INTERVAL_SECS));

    loop {
        interval.tick().await;
        let rooms_guard = rooms.read().await;
        for (document_id, room) in rooms_guard.iter() {
            coordinator.on_store_document(document_id, &room.doc).await;
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    coordinator: Arc<SessionCoordinator>,
    rooms: RoomMap,
) {
    let mut path = String::new();
    let mut query: Option<String> = None;

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        query = req.uri().query().map(|q| q.to_string());
        Ok(resp)
    })
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let document_id = parse_document_id(&path);
    let params = parse_query(query.as_deref());
    let identity = coordinator.on_authenticate(&params).await;
    let user_id = identity.user_id;

    info!(
        "WebSocket connection established: {} (document {}, user {})",
        addr, document_id, user_id
    );

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                error!("Failed to send message: {}", e);
                break;
            }
        }
    });

    let client_id = format!("cli_{}", Uuid::new_v4().simple());
    let conn = Arc::new(ConnectionHandle {
        client_id: client_id.clone(),
        user_id: user_id.clone(),
        read_only: AtomicBool::new(false),
        tx: tx.clone(),
    });

    // Attach to the room. Registration through the slot decision holds the
    // room-map lock, so connections to one document serialize and editor
    // slots go to whoever registered first. The first attach creates the
    // hosted document.
    {
        let mut rooms_guard = rooms.write().await;
        coordinator.on_connect(&document_id, &user_id).await;
        let room = rooms_guard
            .entry(document_id.clone())
            .or_insert_with(Room::new);

        if let Err(e) = coordinator.on_load_document(&document_id, &mut room.doc).await {
            error!("Failed to load document {}: {}", document_id, e);
        }

        let frame = SessionMessage::Document {
            content: room.doc.fragment(&coordinator.config().content_fragment),
            metadata: room.doc.metadata_snapshot(),
        };
        match serde_json::to_string(&frame) {
            Ok(json) => {
                let _ = tx.send(Message::Text(json));
            }
            Err(e) => error!("Failed to serialize document frame: {}", e),
        }

        room.connections.push(conn.clone());
        coordinator.connected(&document_id, conn.as_ref()).await;
    }

    // Handle incoming messages
    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                error!("Error receiving message: {}", e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if let Err(e) =
                    handle_text_message(&text, &document_id, &conn, &coordinator, &rooms).await
                {
                    error!("Error handling message: {}", e);
                }
            }
            Message::Ping(data) => {
                let _ = tx.send(Message::Pong(data));
            }
            Message::Close(_) => {
                info!("Client requested close");
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    {
        let mut rooms_guard = rooms.write().await;
        let mut remaining_links = Vec::new();
        let mut unload = false;

        if let Some(room) = rooms_guard.get_mut(&document_id) {
            room.connections.retain(|c| c.client_id != client_id);
            room.awareness.remove(&client_id);

            if room.connections.is_empty() {
                coordinator.on_store_document(&document_id, &room.doc).await;
                unload = true;
            } else {
                // Tell remaining clients this presence is gone.
                room.broadcast(
                    &SessionMessage::Awareness {
                        client_id: Some(client_id.clone()),
                        state: Value::Null,
                    },
                    None,
                );
                remaining_links = room.links();
            }
        }

        if unload {
            if let Some(room) = rooms_guard.remove(&document_id) {
                let open_secs = (Utc::now() - room.created_at).num_seconds();
                info!(
                    "Document {} unloaded after {}s without participants",
                    document_id, open_secs
                );
            }
        }
        drop(rooms_guard);

        coordinator
            .on_disconnect(&document_id, &user_id, &remaining_links)
            .await;
    }

    send_task.abort();
    info!(
        "Connection closed: {} (document {}, user {})",
        addr, document_id, user_id
    );
}

async fn handle_text_message(
    text: &str,
    document_id: &str,
    conn: &Arc<ConnectionHandle>,
    coordinator: &Arc<SessionCoordinator>,
    rooms: &RoomMap,
) -> anyhow::Result<()> {
    let msg: SessionMessage = serde_json::from_str(text)?;

    match msg {
        SessionMessage::Update { content } => {
            if conn.is_read_only() {
                debug!("Dropping update from read-only client {}", conn.client_id);
                return Ok(());
            }

            let mut rooms_guard = rooms.write().await;
            if let Some(room) = rooms_guard.get_mut(document_id) {
                let fragment = coordinator.config().content_fragment.clone();
                room.doc.replace_fragment(&fragment, content.clone());
                room.broadcast(
                    &SessionMessage::Update { content },
                    Some(&conn.client_id),
                );
            }
        }

        SessionMessage::Awareness { state, .. } => {
            let states = {
                let mut rooms_guard = rooms.write().await;
                let room = match rooms_guard.get_mut(document_id) {
                    Some(room) => room,
                    None => return Ok(()),
                };
                room.awareness.insert(conn.client_id.clone(), state.clone());
                room.broadcast(
                    &SessionMessage::Awareness {
                        client_id: Some(conn.client_id.clone()),
                        state,
                    },
                    Some(&conn.client_id),
                );
                room.awareness_states()
            };

            coordinator.on_awareness_update(document_id, &states).await;
        }

        SessionMessage::Stateless { payload } => {
            coordinator
                .on_stateless(document_id, conn.as_ref(), &payload)
                .await;
        }

        SessionMessage::Document { .. } => {
            warn!(
                "Unexpected document frame from client {}",
                conn.client_id
            );
        }
    }

    Ok(())
}

/// Document id from the request path; the whole path minus surrounding
/// slashes, so nested names like "team/notes" work.
fn parse_document_id(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();

    if let Some(query) = query {
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((key, value)) => {
                    params.insert(decode_component(key), decode_component(value))
                }
                None => params.insert(decode_component(pair), String::new()),
            };
        }
    }

    params
}

/// One form-urlencoded query component: '+' means space and %XX escapes
/// decode to their bytes. Invalid escapes pass through untouched.
fn decode_component(raw: &str) -> String {
    let unplussed = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(unplussed.as_bytes())).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_document_id() {
        assert_eq!(parse_document_id("/doc1"), "doc1");
        assert_eq!(parse_document_id("/team/notes/"), "team/notes");
        assert_eq!(parse_document_id("/"), "default");
        assert_eq!(parse_document_id(""), "default");
    }

    #[test]
    fn test_parse_query() {
        let params = parse_query(Some("userId=alice&debug"));

        assert_eq!(params.get("userId").map(String::as_str), Some("alice"));
        assert_eq!(params.get("debug").map(String::as_str), Some(""));
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_parse_query_decodes_escapes() {
        let params = parse_query(Some("userId=alice%20smith&team=a%2Bb&note=caf%C3%A9+bar"));

        assert_eq!(params.get("userId").map(String::as_str), Some("alice smith"));
        assert_eq!(params.get("team").map(String::as_str), Some("a+b"));
        assert_eq!(params.get("note").map(String::as_str), Some("café bar"));

        // Broken escapes pass through untouched; keys decode like values.
        let params = parse_query(Some("userId=50%25&tag=%zz&my+key=1"));
        assert_eq!(params.get("userId").map(String::as_str), Some("50%"));
        assert_eq!(params.get("tag").map(String::as_str), Some("%zz"));
        assert_eq!(params.get("my key").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_hosted_document_emptiness() {
        let mut doc = HostedDocument::new();
        assert!(doc.is_empty("content"));

        doc.replace_fragment("content", Value::Null);
        assert!(doc.is_empty("content"));

        doc.replace_fragment("content", json!([]));
        assert!(doc.is_empty("content"));

        doc.replace_fragment("content", json!({ "type": "doc" }));
        assert!(!doc.is_empty("content"));
    }

    #[test]
    fn test_hosted_document_stored_round_trip() {
        let mut doc = HostedDocument::new();
        let body = json!({ "type": "doc", "content": [] });

        doc.apply_stored("content", &body).unwrap();
        assert_eq!(doc.to_stored("content").unwrap(), body);

        assert!(doc.to_stored("missing").is_err());
        assert!(doc.apply_stored("content", &Value::Null).is_err());
    }

    #[test]
    fn test_session_message_shapes() {
        let update = serde_json::to_value(SessionMessage::Update {
            content: json!({ "type": "doc" }),
        })
        .unwrap();
        assert_eq!(update["type"], "update");

        let awareness = serde_json::to_value(SessionMessage::Awareness {
            client_id: Some("cli_1".to_string()),
            state: json!({ "cursor": 3 }),
        })
        .unwrap();
        assert_eq!(awareness["type"], "awareness");
        assert_eq!(awareness["clientId"], "cli_1");

        // Clients send awareness without a client id; the field is optional.
        let parsed: SessionMessage =
            serde_json::from_str(r#"{"type":"awareness","state":{"cursor":1}}"#).unwrap();
        assert!(matches!(
            parsed,
            SessionMessage::Awareness { client_id: None, .. }
        ));
    }

    #[test]
    fn test_connection_handle_wraps_stateless_payloads() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = ConnectionHandle {
            client_id: "cli_1".to_string(),
            user_id: "alice".to_string(),
            read_only: AtomicBool::new(false),
            tx,
        };

        conn.send_stateless(r#"{"type":"info","code":"CAN_EDIT","message":"ok"}"#);

        let sent = match rx.try_recv().unwrap() {
            Message::Text(json) => json,
            other => panic!("unexpected frame: {:?}", other),
        };
        let value: Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(value["type"], "stateless");
        let inner: Value = serde_json::from_str(value["payload"].as_str().unwrap()).unwrap();
        assert_eq!(inner["code"], "CAN_EDIT");
    }

    #[test]
    fn test_read_only_flag_flips() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionHandle {
            client_id: "cli_1".to_string(),
            user_id: "alice".to_string(),
            read_only: AtomicBool::new(false),
            tx,
        };

        assert!(!conn.is_read_only());
        conn.set_read_only(true);
        assert!(conn.is_read_only());
        conn.set_read_only(false);
        assert!(!conn.is_read_only());
    }

    #[tokio::test]
    async fn test_decoded_user_id_resolves_color_requests() {
        let params = parse_query(Some("userId=alice%20smith"));
        let store = Arc::new(MemoryDocumentStore::new());
        let coordinator = SessionCoordinator::new(CoordinatorConfig::default(), store);

        let identity = coordinator.on_authenticate(&params).await;
        assert_eq!(identity.user_id, "alice smith");
        coordinator.on_connect("doc1", &identity.user_id).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = ConnectionHandle {
            client_id: "cli_1".to_string(),
            user_id: identity.user_id.clone(),
            read_only: AtomicBool::new(false),
            tx,
        };
        coordinator
            .on_stateless(
                "doc1",
                &conn,
                r#"{"type":"requestUserColor","userId":"alice smith"}"#,
            )
            .await;

        let sent = match rx.try_recv().unwrap() {
            Message::Text(json) => json,
            other => panic!("unexpected frame: {:?}", other),
        };
        let frame: Value = serde_json::from_str(&sent).unwrap();
        let inner: Value = serde_json::from_str(frame["payload"].as_str().unwrap()).unwrap();
        assert_eq!(inner["type"], "userColor");
        assert_eq!(inner["userId"], "alice smith");
        assert_eq!(inner["color"], USER_COLOR_PALETTE[0]);
    }
}
