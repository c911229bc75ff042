use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// A single message in a persisted session. `role` is "user", "assistant",
/// or a specialist name for delegation trace entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// JSONL metadata line (first line of session file).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionMetadata {
    #[serde(rename = "_type")]
    type_field: String,
    created_at: String,
    updated_at: String,
}

/// A conversation session as the presentation shells persist it.
pub struct Session {
    pub key: String,
    pub messages: Vec<SessionMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: String) -> Self {
        let now = Utc::now();
        Self {
            key,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_message(&mut self, role: &str, content: &str) {
        self.messages.push(SessionMessage {
            role: role.into(),
            content: content.into(),
            timestamp: Some(Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
        });
        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }
}

/// Manages sessions with JSONL persistence, one file per session key.
pub struct SessionManager {
    sessions_dir: PathBuf,
    cache: HashMap<String, Session>,
}

impl SessionManager {
    pub fn new(sessions_dir: PathBuf) -> Self {
        std::fs::create_dir_all(&sessions_dir).ok();
        Self {
            sessions_dir,
            cache: HashMap::new(),
        }
    }

    /// Get the file path for a session key.
    /// Replaces ':' with '_' for filesystem safety.
    fn session_path(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(':', "_");
        self.sessions_dir.join(format!("{safe_key}.jsonl"))
    }

    /// Get or create a session, loading from disk if it exists.
    pub fn get_or_create(&mut self, key: &str) -> &mut Session {
        if !self.cache.contains_key(key) {
            let session = self.load(key).unwrap_or_else(|| Session::new(key.into()));
            self.cache.insert(key.into(), session);
        }
        self.cache.get_mut(key).unwrap()
    }

    /// Load a session from its JSONL file.
    fn load(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }

        let file = std::fs::File::open(&path).ok()?;
        let reader = std::io::BufReader::new(file);

        let mut messages = Vec::new();
        let mut created_at = Utc::now();

        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => continue,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let data: serde_json::Value = match serde_json::from_str(line) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Skipping malformed JSONL line: {e}");
                    continue;
                }
            };

            if data.get("_type").and_then(|v| v.as_str()) == Some("metadata") {
                if let Some(ca) = data.get("created_at").and_then(|v| v.as_str()) {
                    created_at = DateTime::parse_from_rfc3339(ca)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now());
                }
            } else if let Ok(msg) = serde_json::from_value::<SessionMessage>(data) {
                messages.push(msg);
            }
        }

        Some(Session {
            key: key.into(),
            messages,
            created_at,
            updated_at: Utc::now(),
        })
    }

    /// Save a session to its JSONL file.
    pub fn save(&mut self, key: &str) -> Result<()> {
        let session = self
            .cache
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("session not in cache: {key}"))?;

        let path = self.session_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::File::create(&path)?;

        let meta = SessionMetadata {
            type_field: "metadata".into(),
            created_at: session.created_at.to_rfc3339(),
            updated_at: session.updated_at.to_rfc3339(),
        };
        writeln!(file, "{}", serde_json::to_string(&meta)?)?;

        for msg in &session.messages {
            writeln!(file, "{}", serde_json::to_string(msg)?)?;
        }

        Ok(())
    }
}
