use std::collections::HashMap;
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use foreman_config::{GatewayConfig, WebConfig};
use foreman_core::bus::InboundMessage;
use foreman_core::TraceStep;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info, warn};

use crate::base::Channel;
use crate::web_assets;

type WsSender = mpsc::UnboundedSender<Message>;

/// WebSocket chat shell with a small embedded page.
///
/// The server is stateless about which chat is "active" — the client
/// includes chatId in every message and filters inbound replies by chatId.
pub struct WebChannel {
    config: WebConfig,
    gateway_config: GatewayConfig,
    sessions_dir: PathBuf,
    connections: Arc<DashMap<String, WsSender>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

#[derive(Clone)]
struct AppState {
    config: WebConfig,
    sessions_dir: PathBuf,
    connections: Arc<DashMap<String, WsSender>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

#[derive(Deserialize)]
struct WsParams {
    password: Option<String>,
}

#[derive(Serialize)]
struct WsOutMsg {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "chatId")]
    chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    /// Delegation trace for this turn, in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<Vec<TraceStep>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<HistoryMessage>>,
}

#[derive(Serialize, Clone)]
struct HistoryMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct WsInMsg {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    #[serde(rename = "chatId")]
    chat_id: String,
}

impl WebChannel {
    pub fn new(
        config: WebConfig,
        gateway_config: GatewayConfig,
        sessions_dir: PathBuf,
    ) -> Result<Self> {
        Ok(Self {
            config,
            gateway_config,
            sessions_dir,
            connections: Arc::new(DashMap::new()),
            shutdown_tx: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Channel for WebChannel {
    fn name(&self) -> &str {
        "web"
    }

    async fn start(&self, inbound_tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let state = AppState {
            config: self.config.clone(),
            sessions_dir: self.sessions_dir.clone(),
            connections: self.connections.clone(),
            inbound_tx,
        };

        let router = Router::new()
            .route("/", get(serve_index))
            .route("/style.css", get(serve_css))
            .route("/app.js", get(serve_js))
            .route("/ws", get(ws_upgrade))
            .route("/api/sessions", get(api_list_sessions))
            .with_state(state);

        let addr: SocketAddr = format!("{}:{}", self.gateway_config.host, self.gateway_config.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid web listen address: {e}"))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Web channel listening on http://{addr}");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let connections = self.connections.clone();
        tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });

            if let Err(e) = server.await {
                error!("Web server error: {e}");
            }

            connections.clear();
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        self.connections.clear();
        Ok(())
    }

    async fn send(&self, msg: &foreman_core::bus::OutboundMessage) -> Result<()> {
        if self.connections.is_empty() {
            warn!(
                "No active WebSocket connections, reply for chat_id={} saved to session only",
                msg.chat_id
            );
            return Ok(());
        }

        let out = WsOutMsg {
            msg_type: "message".to_string(),
            content: Some(msg.content.clone()),
            chat_id: Some(msg.chat_id.clone()),
            timestamp: Some(chrono::Local::now().to_rfc3339()),
            steps: if msg.steps.is_empty() {
                None
            } else {
                Some(msg.steps.clone())
            },
            messages: None,
        };
        let json = serde_json::to_string(&out)?;

        // Broadcast to all connections — the client filters by chatId.
        for entry in self.connections.iter() {
            if entry
                .value()
                .send(Message::Text(json.clone().into()))
                .is_err()
            {
                warn!(
                    "WebSocket send failed for conn={}, will clean up on disconnect",
                    entry.key()
                );
            }
        }
        Ok(())
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        if self.config.allow_from.is_empty() {
            return true;
        }
        self.config.allow_from.iter().any(|a| a == sender_id)
    }
}

// --- Axum Handlers ---

async fn serve_index() -> Html<&'static str> {
    Html(web_assets::INDEX_HTML)
}

async fn serve_css() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css")], web_assets::STYLE_CSS)
}

async fn serve_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        web_assets::APP_JS,
    )
}

async fn api_list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = list_web_sessions(&state.sessions_dir);
    axum::Json(sessions)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    if !state.config.password.is_empty() {
        let provided = params.password.as_deref().unwrap_or("");
        if provided != state.config.password {
            return ws
                .on_upgrade(|mut socket| async move {
                    let err = WsOutMsg {
                        msg_type: "error".to_string(),
                        content: Some("Authentication failed".to_string()),
                        chat_id: None,
                        timestamp: None,
                        steps: None,
                        messages: None,
                    };
                    let _ = socket
                        .send(Message::Text(serde_json::to_string(&err).unwrap().into()))
                        .await;
                    let _ = socket.close().await;
                })
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_ws(socket, state))
        .into_response()
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let short_conn = &conn_id[..8];
    info!("WebSocket connected: conn={short_conn}");

    let (ws_write, mut ws_read) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    state.connections.insert(conn_id.clone(), tx.clone());

    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(ws_write_loop(ws_write, rx, write_conn_id));

    let connected = WsOutMsg {
        msg_type: "connected".to_string(),
        content: None,
        chat_id: None,
        timestamp: None,
        steps: None,
        messages: None,
    };
    if let Ok(json) = serde_json::to_string(&connected) {
        let _ = tx.send(Message::Text(json.into()));
    }

    while let Some(result) = ws_read.next().await {
        let msg = match result {
            Ok(m) => m,
            Err(e) => {
                warn!("WebSocket read error for conn={short_conn}: {e}");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let parsed: WsInMsg = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(_) => continue,
                };

                match parsed.msg_type.as_str() {
                    "get_history" => {
                        if parsed.chat_id.is_empty() {
                            continue;
                        }
                        send_history(&state.sessions_dir, &parsed.chat_id, &tx);
                    }
                    "message" => {
                        let chat_id = parsed.chat_id;
                        if chat_id.is_empty() || parsed.content.trim().is_empty() {
                            continue;
                        }

                        let sender_id = format!("web:{}", &chat_id[..chat_id.len().min(8)]);

                        let inbound = InboundMessage {
                            channel: "web".to_string(),
                            sender_id,
                            chat_id,
                            content: parsed.content,
                            metadata: HashMap::new(),
                            timestamp: chrono::Local::now().to_rfc3339(),
                        };
                        if let Err(e) = state.inbound_tx.send(inbound).await {
                            error!("Failed to send inbound message: {e}");
                            break;
                        }
                    }
                    _ => {}
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.connections.remove(&conn_id);
    write_handle.abort();
    info!("WebSocket disconnected: conn={short_conn}");
}

/// Send session history for a chat over a WS connection.
fn send_history(
    sessions_dir: &std::path::Path,
    chat_id: &str,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let history = load_session_history(sessions_dir, chat_id);
    if !history.is_empty() {
        let history_msg = WsOutMsg {
            msg_type: "history".to_string(),
            content: None,
            chat_id: Some(chat_id.to_string()),
            timestamp: None,
            steps: None,
            messages: Some(history),
        };
        if let Ok(json) = serde_json::to_string(&history_msg) {
            let _ = tx.send(Message::Text(json.into()));
        }
    }
}

async fn ws_write_loop(
    mut ws_write: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    conn_id: String,
) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = ws_write.send(msg).await {
            warn!("WebSocket write error for conn={conn_id}: {e}");
            break;
        }
    }
}

// --- Session History ---

const MAX_HISTORY_MESSAGES: usize = 100;

/// Load message history from a session's JSONL file. Includes the
/// specialist trace entries, capped at MAX_HISTORY_MESSAGES.
fn load_session_history(sessions_dir: &std::path::Path, chat_id: &str) -> Vec<HistoryMessage> {
    // Mirror SessionManager::session_path: replace ':' with '_'
    let session_key = format!("web:{chat_id}");
    let safe_key = session_key.replace(':', "_");
    let path = sessions_dir.join(format!("{safe_key}.jsonl"));

    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    let reader = std::io::BufReader::new(file);
    let mut messages = Vec::new();

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        // Skip metadata lines
        if value.get("_type").is_some() {
            continue;
        }

        let role = match value.get("role").and_then(|r| r.as_str()) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => continue,
        };

        let content = match value.get("content").and_then(|c| c.as_str()) {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => continue,
        };

        let timestamp = value
            .get("timestamp")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string());

        messages.push(HistoryMessage {
            role,
            content,
            timestamp,
        });
    }

    if messages.len() > MAX_HISTORY_MESSAGES {
        messages.split_off(messages.len() - MAX_HISTORY_MESSAGES)
    } else {
        messages
    }
}

/// Session info returned by the sessions listing API.
#[derive(Serialize)]
struct SessionInfo {
    id: String,
    title: String,
    #[serde(rename = "updatedAt")]
    updated_at: String,
}

/// List web channel sessions from the sessions directory.
fn list_web_sessions(sessions_dir: &std::path::Path) -> Vec<SessionInfo> {
    let entries = match std::fs::read_dir(sessions_dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut sessions = Vec::new();

    for entry in entries.flatten() {
        let filename = entry.file_name().to_string_lossy().to_string();
        if !filename.starts_with("web_") || !filename.ends_with(".jsonl") {
            continue;
        }

        // Extract chat_id: "web_{uuid}.jsonl" -> "{uuid}"
        let chat_id = filename
            .strip_prefix("web_")
            .and_then(|s| s.strip_suffix(".jsonl"))
            .unwrap_or("")
            .to_string();
        if chat_id.is_empty() {
            continue;
        }

        let file = match std::fs::File::open(entry.path()) {
            Ok(f) => f,
            Err(_) => continue,
        };
        let reader = std::io::BufReader::new(file);

        let mut updated_at = String::new();
        let mut title = String::new();

        for line in reader.lines().map_while(Result::ok) {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let value: serde_json::Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(_) => continue,
            };

            if value.get("_type").and_then(|t| t.as_str()) == Some("metadata") {
                if let Some(ts) = value.get("updated_at").and_then(|t| t.as_str()) {
                    updated_at = ts.to_string();
                }
                continue;
            }

            // Find first user message for the title
            if title.is_empty() && value.get("role").and_then(|r| r.as_str()) == Some("user") {
                if let Some(content) = value.get("content").and_then(|c| c.as_str()) {
                    title = content.chars().take(50).collect();
                    if content.len() > 50 {
                        title.push_str("...");
                    }
                }
            }

            if !updated_at.is_empty() && !title.is_empty() {
                break;
            }
        }

        if title.is_empty() {
            title = "New Chat".to_string();
        }

        sessions.push(SessionInfo {
            id: chat_id,
            title,
            updated_at,
        });
    }

    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    sessions
}
