//! Per-session message queue.
//!
//! One mutex guards the whole manager; per-session state lives behind it.
//! Responsibilities: bounded FIFO with drop-oldest overflow, a 5-second
//! exact-content dedup window, and the atomic idle→busy transition that
//! closes the "am I busy? / mark me busy" race.
//!
//! Debounce lives with the caller: an idle session drains immediately, a
//! busy one gathers followups for the configured window after its run
//! completes and drains them as one batch.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use pl_domain::channel::InboundMessage;
use pl_domain::config::QueueConfig;
use pl_domain::trace::TraceEvent;

/// A queued inbound message.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub message: InboundMessage,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Identical content inside the dedup window; the message was rejected.
    Duplicate,
    /// Queued, but the oldest entry was dropped to make room.
    QueuedDroppedOldest,
}

#[derive(Default)]
struct SessionQueue {
    pending: VecDeque<QueueEntry>,
    processing: bool,
    /// Recent content fingerprints for the dedup window (covers entries
    /// that were already drained, so a fast duplicate still dedups).
    recent: VecDeque<(u64, Instant)>,
}

#[derive(Default)]
pub struct MessageQueue {
    inner: Mutex<HashMap<String, SessionQueue>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(
        &self,
        session_key: &str,
        message: InboundMessage,
        config: &QueueConfig,
    ) -> EnqueueOutcome {
        let now = Instant::now();
        let window = Duration::from_millis(config.dedup_window_ms);
        let fingerprint = content_hash(&message.content);

        let mut inner = self.inner.lock();
        let queue = inner.entry(session_key.to_owned()).or_default();

        while queue
            .recent
            .front()
            .is_some_and(|(_, at)| now - *at > window)
        {
            queue.recent.pop_front();
        }
        if queue.recent.iter().any(|(h, _)| *h == fingerprint) {
            TraceEvent::QueueDropped {
                session_key: session_key.to_owned(),
                reason: "duplicate".into(),
            }
            .emit();
            return EnqueueOutcome::Duplicate;
        }
        queue.recent.push_back((fingerprint, now));

        let mut outcome = EnqueueOutcome::Queued;
        if queue.pending.len() >= config.max_pending {
            queue.pending.pop_front();
            TraceEvent::QueueDropped {
                session_key: session_key.to_owned(),
                reason: "overflow".into(),
            }
            .emit();
            outcome = EnqueueOutcome::QueuedDroppedOldest;
        }

        queue.pending.push_back(QueueEntry {
            message,
            enqueued_at: now,
        });
        outcome
    }

    /// Atomic idle→busy transition under the queue lock. Returns true
    /// exactly once per transition; the caller that got `true` owns the
    /// run and must call [`clear_processing`](Self::clear_processing).
    pub fn try_set_processing(&self, session_key: &str) -> bool {
        let mut inner = self.inner.lock();
        let queue = inner.entry(session_key.to_owned()).or_default();
        if queue.processing {
            return false;
        }
        queue.processing = true;
        true
    }

    pub fn clear_processing(&self, session_key: &str) {
        if let Some(queue) = self.inner.lock().get_mut(session_key) {
            queue.processing = false;
        }
    }

    pub fn is_processing(&self, session_key: &str) -> bool {
        self.inner
            .lock()
            .get(session_key)
            .map(|q| q.processing)
            .unwrap_or(false)
    }

    /// Take every pending message, oldest first.
    pub fn drain(&self, session_key: &str) -> Vec<InboundMessage> {
        let mut inner = self.inner.lock();
        match inner.get_mut(session_key) {
            Some(queue) => queue.pending.drain(..).map(|e| e.message).collect(),
            None => Vec::new(),
        }
    }

    pub fn pending_len(&self, session_key: &str) -> usize {
        self.inner
            .lock()
            .get(session_key)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    /// Drop state for sessions with nothing pending, nothing running, and
    /// no live dedup fingerprints.
    pub fn prune_idle(&self, dedup_window: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        for queue in inner.values_mut() {
            while queue
                .recent
                .front()
                .is_some_and(|(_, at)| now - *at > dedup_window)
            {
                queue.recent.pop_front();
            }
        }
        inner.retain(|_, q| q.processing || !q.pending.is_empty() || !q.recent.is_empty());
    }
}

fn content_hash(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}
