//! Console transport for local development.
//!
//! Reads lines from stdin as messages from the `operator` in chat
//! `local`, prints assistant blocks to stdout.

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use pl_domain::channel::{
    AttachmentRef, ChannelTransport, InboundMessage, OutboundPayload, SendErrorKind,
};
use pl_domain::error::{Error, Result};

pub struct ConsoleTransport;

impl ConsoleTransport {
    /// Spawn the stdin reader; inbound lines flow into `ingress`.
    pub fn start(ingress: mpsc::Sender<InboundMessage>) -> Self {
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let msg = InboundMessage {
                            channel_id: "console".into(),
                            chat_id: "local".into(),
                            from_id: "operator".into(),
                            is_group: false,
                            content: line,
                            attachments: vec![],
                            reply_to: None,
                            msg_id: uuid::Uuid::new_v4().to_string(),
                            received_at: Utc::now(),
                        };
                        if ingress.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // stdin closed
                    Err(e) => {
                        tracing::warn!(error = %e, "console read failed");
                        break;
                    }
                }
            }
            tracing::info!("console channel closed");
        });
        Self
    }
}

#[async_trait::async_trait]
impl ChannelTransport for ConsoleTransport {
    fn id(&self) -> &str {
        "console"
    }

    async fn send(
        &self,
        _chat_id: &str,
        payload: OutboundPayload,
    ) -> std::result::Result<(), SendErrorKind> {
        println!("{}", payload.text);
        Ok(())
    }

    async fn download(&self, att: &AttachmentRef) -> Result<(Vec<u8>, String)> {
        Err(Error::Validation(format!(
            "console channel has no attachments (requested '{}')",
            att.id
        )))
    }

    fn max_block_chars(&self) -> usize {
        2_000
    }
}
