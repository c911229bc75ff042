use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use foreman_core::bus::{InboundMessage, OutboundMessage};

/// Trait that all presentation shells must satisfy. The routing core never
/// assumes which shell is attached.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name (e.g. "web", "api").
    fn name(&self) -> &str;

    /// Start listening for messages. Sends inbound messages through the provided sender.
    async fn start(&self, inbound_tx: mpsc::Sender<InboundMessage>) -> Result<()>;

    /// Stop the channel and clean up resources.
    async fn stop(&self) -> Result<()>;

    /// Deliver a reply (output + delegation trace) through this channel.
    async fn send(&self, msg: &OutboundMessage) -> Result<()>;

    /// Check if a sender is allowed to use this assistant.
    fn is_allowed(&self, sender_id: &str) -> bool;
}
