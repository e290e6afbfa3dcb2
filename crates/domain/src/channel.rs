//! Channel transport interface.
//!
//! Concrete transports (messaging platforms, web UIs, a local console) live
//! outside the core. They deliver inbound messages into the orchestrator's
//! ingress channel and implement [`ChannelTransport`] for the outbound side.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reference to an inbound attachment. The transport resolves it to bytes on
/// demand via [`ChannelTransport::download`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// One inbound message, normalized across transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: String,
    pub chat_id: String,
    pub from_id: String,
    pub is_group: bool,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub reply_to: Option<String>,
    pub msg_id: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// Outbound block of assistant text.
#[derive(Debug, Clone)]
pub struct OutboundPayload {
    pub text: String,
    /// Message id to thread under. Set on the first block of a reply only.
    pub reply_to: Option<String>,
}

/// Why a send failed — the orchestrator only cares about the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    RateLimited,
    ChatNotFound,
    Transient,
    Permanent,
}

/// Outbound operations a transport must support. Inbound delivery happens by
/// pushing [`InboundMessage`]s into the sender handed over at attach time.
#[async_trait::async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Stable transport identifier (`"telegram"`, `"console"`, ...).
    fn id(&self) -> &str;

    async fn send(
        &self,
        chat_id: &str,
        payload: OutboundPayload,
    ) -> std::result::Result<(), SendErrorKind>;

    async fn react(&self, _msg_id: &str, _emoji: &str) -> Result<()> {
        Ok(())
    }

    async fn mark_read(&self, _msg_ids: &[String]) -> Result<()> {
        Ok(())
    }

    async fn typing(&self, _chat_id: &str) -> Result<()> {
        Ok(())
    }

    /// Fetch attachment bytes and their MIME type.
    async fn download(&self, att: &AttachmentRef) -> Result<(Vec<u8>, String)>;

    /// Per-channel block formatting applied just before send.
    fn format_block(&self, text: &str) -> String {
        text.to_string()
    }

    /// Largest block the channel accepts; the streamer flushes at this size.
    fn max_block_chars(&self) -> usize {
        4000
    }
}
