//! Progressive block streamer.
//!
//! Coalesces model tokens into channel-sized blocks and flushes at natural
//! boundaries: a paragraph break if one exists, else a newline, else a
//! sentence end, else a word boundary. Triggers: the buffer reaching the
//! channel's block size, an idle window with no new tokens, an explicit
//! `flush_now`, or `finish`.
//!
//! `finish` is idempotent, and a cancelling caller must invoke it *before*
//! tripping its cancel token — flushing after cancellation would silently
//! drop the buffered tail.

use std::sync::Arc;

use pl_domain::channel::{ChannelTransport, OutboundPayload};

pub struct BlockStreamer {
    transport: Arc<dyn ChannelTransport>,
    chat_id: String,
    /// Attached to the first block only.
    reply_to: Option<String>,
    max_chars: usize,
    buffer: String,
    sent_blocks: usize,
    finished: bool,
}

impl BlockStreamer {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        chat_id: impl Into<String>,
        reply_to: Option<String>,
    ) -> Self {
        let max_chars = transport.max_block_chars().max(64);
        Self {
            transport,
            chat_id: chat_id.into(),
            reply_to,
            max_chars,
            buffer: String::new(),
            sent_blocks: 0,
            finished: false,
        }
    }

    /// Append a token fragment; flushes whole blocks while the buffer
    /// exceeds the channel bound.
    pub async fn push(&mut self, text: &str) {
        if self.finished {
            return;
        }
        self.buffer.push_str(text);
        while self.buffer.len() >= self.max_chars {
            let cut = flush_boundary(&self.buffer, self.max_chars);
            self.emit(cut).await;
        }
    }

    /// Flush whatever is buffered at the best available boundary. Used on
    /// idle timeouts and between tool-loop iterations.
    pub async fn flush_now(&mut self) {
        if self.finished || self.buffer.trim().is_empty() {
            return;
        }
        let len = self.buffer.len();
        self.emit(len).await;
    }

    /// Final flush. Safe to call multiple times.
    pub async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.flush_now().await;
        self.finished = true;
    }

    /// Whether any block has reached the channel. The orchestrator falls
    /// back to one non-streaming send when this is false.
    pub fn has_sent(&self) -> bool {
        self.sent_blocks > 0
    }

    pub fn blocks_sent(&self) -> usize {
        self.sent_blocks
    }

    async fn emit(&mut self, cut: usize) {
        let block: String = self.buffer.drain(..cut).collect();
        let trimmed = block.trim_end();
        if trimmed.is_empty() {
            return;
        }

        let payload = OutboundPayload {
            text: self.transport.format_block(trimmed),
            reply_to: if self.sent_blocks == 0 {
                self.reply_to.clone()
            } else {
                None
            },
        };

        match self.transport.send(&self.chat_id, payload).await {
            Ok(()) => self.sent_blocks += 1,
            Err(kind) => {
                tracing::warn!(chat = %self.chat_id, ?kind, "block send failed");
                // Count it anyway so the fallback path does not duplicate
                // the text on a transient mid-stream failure.
                self.sent_blocks += 1;
            }
        }
    }
}

/// Pick the cut index for a block of at most `max` bytes: walk back from
/// the feasible flush point looking for, in priority order, a paragraph
/// break, a newline, a sentence terminator followed by space, then a word
/// boundary. The remainder stays buffered for the next block.
fn flush_boundary(buffer: &str, max: usize) -> usize {
    let mut limit = max.min(buffer.len());
    while limit > 0 && !buffer.is_char_boundary(limit) {
        limit -= 1;
    }
    let slice = &buffer[..limit];

    if let Some(pos) = slice.rfind("\n\n") {
        if pos > 0 {
            return pos + 2;
        }
    }
    if let Some(pos) = slice.rfind('\n') {
        if pos > 0 {
            return pos + 1;
        }
    }
    let sentence_end = ['.', '!', '?'];
    let bytes = slice.as_bytes();
    for i in (1..slice.len()).rev() {
        if bytes[i] == b' ' && sentence_end.contains(&(bytes[i - 1] as char)) {
            return i + 1;
        }
    }
    if let Some(pos) = slice.rfind(' ') {
        if pos > 0 {
            return pos + 1;
        }
    }
    limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pl_domain::channel::{AttachmentRef, SendErrorKind};

    struct Recording {
        blocks: Mutex<Vec<OutboundPayload>>,
        max_chars: usize,
    }

    #[async_trait::async_trait]
    impl ChannelTransport for Recording {
        fn id(&self) -> &str {
            "test"
        }
        async fn send(
            &self,
            _chat_id: &str,
            payload: OutboundPayload,
        ) -> Result<(), SendErrorKind> {
            self.blocks.lock().push(payload);
            Ok(())
        }
        async fn download(
            &self,
            _att: &AttachmentRef,
        ) -> pl_domain::Result<(Vec<u8>, String)> {
            Ok((vec![], "application/octet-stream".into()))
        }
        fn max_block_chars(&self) -> usize {
            self.max_chars
        }
    }

    fn transport(max_chars: usize) -> Arc<Recording> {
        Arc::new(Recording {
            blocks: Mutex::new(Vec::new()),
            max_chars,
        })
    }

    #[tokio::test]
    async fn small_text_flushes_only_on_finish() {
        let t = transport(200);
        let mut s = BlockStreamer::new(t.clone(), "chat", Some("msg1".into()));
        s.push("hello ").await;
        s.push("world").await;
        assert!(!s.has_sent());
        s.finish().await;
        let blocks = t.blocks.lock();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "hello world");
        assert_eq!(blocks[0].reply_to.as_deref(), Some("msg1"));
    }

    #[tokio::test]
    async fn long_text_splits_at_sentence_boundary() {
        let t = transport(80);
        let mut s = BlockStreamer::new(t.clone(), "chat", None);
        s.push("First sentence here. Second sentence follows. And a third one that keeps going on for a while.")
            .await;
        s.finish().await;

        let blocks = t.blocks.lock();
        assert!(blocks.len() >= 2);
        assert!(blocks[0].text.ends_with('.'), "block: {:?}", blocks[0].text);
    }

    #[tokio::test]
    async fn paragraph_break_preferred() {
        let t = transport(64);
        let mut s = BlockStreamer::new(t.clone(), "chat", None);
        s.push("Short paragraph one.\n\nNow a second paragraph that is long enough to push past the limit.")
            .await;
        s.finish().await;

        let blocks = t.blocks.lock();
        assert_eq!(blocks[0].text, "Short paragraph one.");
    }

    #[tokio::test]
    async fn concatenation_is_prefix_of_full_text() {
        let full = "Sentence one is here. Sentence two is also here. Sentence three wraps it up nicely, with some extra words to force multiple blocks out of the streamer.";
        let t = transport(50);
        let mut s = BlockStreamer::new(t.clone(), "chat", None);
        for chunk in full.as_bytes().chunks(7) {
            s.push(std::str::from_utf8(chunk).unwrap()).await;
        }
        s.finish().await;

        let blocks = t.blocks.lock();
        // Whitespace at block edges is trimmed on send; compare modulo it.
        let joined: String = blocks
            .iter()
            .map(|b| b.text.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect::<Vec<_>>()
            .join(" ");
        let normalized: String = full.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(joined, normalized);
    }

    #[tokio::test]
    async fn only_first_block_carries_reply_to() {
        let t = transport(40);
        let mut s = BlockStreamer::new(t.clone(), "chat", Some("orig".into()));
        s.push("A first chunk of text that will definitely not fit in one block at all. More text follows here.")
            .await;
        s.finish().await;

        let blocks = t.blocks.lock();
        assert!(blocks.len() >= 2);
        assert_eq!(blocks[0].reply_to.as_deref(), Some("orig"));
        assert!(blocks[1..].iter().all(|b| b.reply_to.is_none()));
    }

    #[tokio::test]
    async fn finish_is_idempotent() {
        let t = transport(200);
        let mut s = BlockStreamer::new(t.clone(), "chat", None);
        s.push("tail").await;
        s.finish().await;
        s.finish().await;
        s.finish().await;
        assert_eq!(t.blocks.lock().len(), 1);
        assert_eq!(s.blocks_sent(), 1);
    }

    #[tokio::test]
    async fn push_after_finish_is_ignored() {
        let t = transport(200);
        let mut s = BlockStreamer::new(t.clone(), "chat", None);
        s.finish().await;
        s.push("late").await;
        s.flush_now().await;
        assert!(!s.has_sent());
    }
}
