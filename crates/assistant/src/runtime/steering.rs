//! Steer channels.
//!
//! A running agent owns an interrupt channel; queue-mode `steer` messages
//! are pushed into it and injected as extra user turns between model
//! calls. `try_steer` is non-blocking — when it fails (no run, or the
//! channel is full) callers fall back to the backlog.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

const STEER_CAPACITY: usize = 8;

#[derive(Default)]
pub struct SteerMap {
    senders: Mutex<HashMap<String, mpsc::Sender<String>>>,
}

impl SteerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a steer channel for a run. The runner holds the receiver.
    pub fn register(&self, session_key: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(STEER_CAPACITY);
        self.senders.lock().insert(session_key.to_owned(), tx);
        rx
    }

    pub fn remove(&self, session_key: &str) {
        self.senders.lock().remove(session_key);
    }

    /// Deliver a steering message to the running agent. Returns false if
    /// no run is active or the channel is saturated.
    pub fn try_steer(&self, session_key: &str, text: &str) -> bool {
        let senders = self.senders.lock();
        match senders.get(session_key) {
            Some(tx) => tx.try_send(text.to_owned()).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn steer_reaches_registered_run() {
        let map = SteerMap::new();
        let mut rx = map.register("s1");
        assert!(map.try_steer("s1", "change course"));
        assert_eq!(rx.try_recv().unwrap(), "change course");
    }

    #[tokio::test]
    async fn steer_without_run_fails() {
        let map = SteerMap::new();
        assert!(!map.try_steer("ghost", "hello?"));
    }

    #[tokio::test]
    async fn saturated_channel_rejects() {
        let map = SteerMap::new();
        let _rx = map.register("s1");
        for i in 0..STEER_CAPACITY {
            assert!(map.try_steer("s1", &format!("m{i}")));
        }
        assert!(!map.try_steer("s1", "overflow"));
    }

    #[tokio::test]
    async fn remove_closes_the_path() {
        let map = SteerMap::new();
        let _rx = map.register("s1");
        map.remove("s1");
        assert!(!map.try_steer("s1", "late"));
    }
}
