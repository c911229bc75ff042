use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::agent::router::TraceStep;

/// Message received from a chat shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// Message to send back through a chat shell: the manager's final output
/// plus the ordered trace of specialist delegations for that turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub steps: Vec<TraceStep>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Async message bus connecting chat shells to the routing loop.
pub struct MessageBus {
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub inbound_rx: mpsc::Receiver<InboundMessage>,
    pub outbound_tx: broadcast::Sender<OutboundMessage>,
}

impl MessageBus {
    pub fn new(buffer: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer);
        let (outbound_tx, _) = broadcast::channel(buffer);
        Self {
            inbound_tx,
            inbound_rx,
            outbound_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::decision::Specialist;

    #[test]
    fn session_key_joins_channel_and_chat() {
        let msg = InboundMessage {
            channel: "web".into(),
            sender_id: "web:abc".into(),
            chat_id: "abc-123".into(),
            content: "hi".into(),
            timestamp: String::new(),
            metadata: HashMap::new(),
        };
        assert_eq!(msg.session_key(), "web:abc-123");
    }

    #[test]
    fn outbound_steps_serialize_with_role_names() {
        let msg = OutboundMessage {
            channel: "api".into(),
            chat_id: "1".into(),
            content: "done".into(),
            steps: vec![TraceStep {
                role: Specialist::DataScientist,
                response: "42".into(),
            }],
            metadata: HashMap::new(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"data_scientist\""));
        assert!(json.contains("\"response\":\"42\""));
    }
}
