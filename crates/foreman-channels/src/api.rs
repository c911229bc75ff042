use std::collections::HashMap;
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use foreman_config::{ApiConfig, GatewayConfig};
use foreman_core::bus::{InboundMessage, OutboundMessage};
use foreman_core::TraceStep;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info, warn};

use crate::base::Channel;

/// HTTP/JSON chat shell: one POST per user message, with the reply
/// correlated back to the request by chat id.
///
/// Functionally interchangeable with the WebSocket shell — both present
/// the same routing loop; this one is request/response instead of push.
pub struct ApiChannel {
    config: ApiConfig,
    gateway_config: GatewayConfig,
    sessions_dir: PathBuf,
    pending: Arc<DashMap<String, oneshot::Sender<OutboundMessage>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

#[derive(Clone)]
struct AppState {
    reply_timeout: Duration,
    sessions_dir: PathBuf,
    pending: Arc<DashMap<String, oneshot::Sender<OutboundMessage>>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    #[serde(default)]
    chat_id: String,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    chat_id: String,
    output: String,
    intermediate_steps: Vec<TraceStep>,
}

#[derive(Serialize)]
struct HistoryEntry {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

impl ApiChannel {
    pub fn new(
        config: ApiConfig,
        gateway_config: GatewayConfig,
        sessions_dir: PathBuf,
    ) -> Result<Self> {
        Ok(Self {
            config,
            gateway_config,
            sessions_dir,
            pending: Arc::new(DashMap::new()),
            shutdown_tx: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Channel for ApiChannel {
    fn name(&self) -> &str {
        "api"
    }

    async fn start(&self, inbound_tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let state = AppState {
            reply_timeout: Duration::from_secs(self.config.reply_timeout_secs),
            sessions_dir: self.sessions_dir.clone(),
            pending: self.pending.clone(),
            inbound_tx,
        };

        let router = Router::new()
            .route("/api/chat", post(api_chat))
            .route("/api/history/{chat_id}", get(api_history))
            .with_state(state);

        let addr: SocketAddr = format!("{}:{}", self.gateway_config.host, self.config.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid api listen address: {e}"))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Api channel listening on http://{addr}");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!("Api server error: {e}");
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        self.pending.clear();
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        // Complete the waiting request for this chat, if any. Replies that
        // arrive after the request timed out are dropped here; the session
        // file still has them.
        match self.pending.remove(&msg.chat_id) {
            Some((_, tx)) => {
                if tx.send(msg.clone()).is_err() {
                    warn!("Api request for chat_id={} already gone", msg.chat_id);
                }
            }
            None => {
                warn!("No pending api request for chat_id={}", msg.chat_id);
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

async fn api_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if req.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".into()));
    }

    let chat_id = if req.chat_id.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        req.chat_id
    };

    let (tx, rx) = oneshot::channel();
    state.pending.insert(chat_id.clone(), tx);

    let inbound = InboundMessage {
        channel: "api".to_string(),
        sender_id: format!("api:{}", &chat_id[..chat_id.len().min(8)]),
        chat_id: chat_id.clone(),
        content: req.message,
        metadata: HashMap::new(),
        timestamp: chrono::Local::now().to_rfc3339(),
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        state.pending.remove(&chat_id);
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "routing loop is not running".into(),
        ));
    }

    match tokio::time::timeout(state.reply_timeout, rx).await {
        Ok(Ok(reply)) => Ok(Json(ChatResponse {
            chat_id,
            output: reply.content,
            intermediate_steps: reply.steps,
        })),
        Ok(Err(_)) => {
            state.pending.remove(&chat_id);
            Err((
                StatusCode::BAD_GATEWAY,
                "reply channel closed before a response arrived".into(),
            ))
        }
        Err(_) => {
            state.pending.remove(&chat_id);
            Err((StatusCode::GATEWAY_TIMEOUT, "timed out waiting for a reply".into()))
        }
    }
}

async fn api_history(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Json<Vec<HistoryEntry>> {
    Json(load_history(&state.sessions_dir, &chat_id))
}

/// Load stored turns (including specialist trace entries) for a chat.
fn load_history(sessions_dir: &std::path::Path, chat_id: &str) -> Vec<HistoryEntry> {
    let safe_key = format!("api:{chat_id}").replace(':', "_");
    let path = sessions_dir.join(format!("{safe_key}.jsonl"));

    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    let reader = std::io::BufReader::new(file);
    let mut entries = Vec::new();

    for line in reader.lines().map_while(Result::ok) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if value.get("_type").is_some() {
            continue;
        }
        let (Some(role), Some(content)) = (
            value.get("role").and_then(|r| r.as_str()),
            value.get("content").and_then(|c| c.as_str()),
        ) else {
            continue;
        };
        entries.push(HistoryEntry {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: value
                .get("timestamp")
                .and_then(|t| t.as_str())
                .map(|t| t.to_string()),
        });
    }

    entries
}
