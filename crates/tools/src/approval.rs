//! Human approval rendezvous.
//!
//! A confirmation-gated call blocks on a oneshot keyed by its call id. The
//! orchestrator forwards the request to the originating chat ("reply
//! /approve <id> or /deny <id>") and resolves the rendezvous when the
//! command arrives. Timeout and unknown ids both resolve to deny — the
//! default is always the safe side.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: String },
}

/// What the orchestrator forwards to the chat.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub call_id: String,
    pub tool_name: String,
    pub summary: String,
    pub session_key: String,
    pub created_at: DateTime<Utc>,
}

struct Pending {
    request: ApprovalRequest,
    respond: oneshot::Sender<ApprovalDecision>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ApprovalBroker {
    pending: RwLock<HashMap<String, Pending>>,
    notify: mpsc::Sender<ApprovalRequest>,
    timeout: Duration,
}

impl ApprovalBroker {
    /// Returns the broker plus the stream of outbound approval prompts the
    /// orchestrator must deliver.
    pub fn new(timeout: Duration) -> (Self, mpsc::Receiver<ApprovalRequest>) {
        let (notify, rx) = mpsc::channel(32);
        (
            Self {
                pending: RwLock::new(HashMap::new()),
                notify,
                timeout,
            },
            rx,
        )
    }

    /// Block until a human decides, the timeout passes, or the broker is
    /// shutting down. Never returns `Approved` unless someone approved.
    pub async fn request(&self, request: ApprovalRequest) -> ApprovalDecision {
        let call_id = request.call_id.clone();
        let (tx, rx) = oneshot::channel();

        self.pending.write().insert(
            call_id.clone(),
            Pending {
                request: request.clone(),
                respond: tx,
            },
        );

        if self.notify.send(request).await.is_err() {
            self.pending.write().remove(&call_id);
            return ApprovalDecision::Denied {
                reason: "approval channel closed".into(),
            };
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => ApprovalDecision::Denied {
                reason: "approval request dropped".into(),
            },
            Err(_) => {
                self.pending.write().remove(&call_id);
                ApprovalDecision::Denied {
                    reason: format!("no approval within {}s", self.timeout.as_secs()),
                }
            }
        }
    }

    /// Resolve `/approve <id>`. Returns false for unknown ids.
    pub fn approve(&self, call_id: &str) -> bool {
        if let Some(pending) = self.pending.write().remove(call_id) {
            let _ = pending.respond.send(ApprovalDecision::Approved);
            return true;
        }
        false
    }

    /// Resolve `/deny <id>`. Returns false for unknown ids.
    pub fn deny(&self, call_id: &str, reason: Option<String>) -> bool {
        if let Some(pending) = self.pending.write().remove(call_id) {
            let _ = pending.respond.send(ApprovalDecision::Denied {
                reason: reason.unwrap_or_else(|| "denied by user".into()),
            });
            return true;
        }
        false
    }

    /// Pending requests, oldest first (introspection / `/approve` help).
    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        let mut out: Vec<ApprovalRequest> = self
            .pending
            .read()
            .values()
            .map(|p| p.request.clone())
            .collect();
        out.sort_by_key(|r| r.created_at);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            call_id: id.into(),
            tool_name: "exec".into(),
            summary: "rm -r build/".into(),
            session_key: "t:c:main".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn approve_resolves_waiter() {
        let (broker, mut rx) = ApprovalBroker::new(Duration::from_secs(5));
        let broker = std::sync::Arc::new(broker);

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request(request("c1")).await })
        };

        // The orchestrator side sees the outbound prompt...
        let prompt = rx.recv().await.unwrap();
        assert_eq!(prompt.call_id, "c1");
        // ...and the human approves.
        assert!(broker.approve("c1"));

        assert_eq!(waiter.await.unwrap(), ApprovalDecision::Approved);
        assert!(broker.list_pending().is_empty());
    }

    #[tokio::test]
    async fn deny_carries_reason() {
        let (broker, mut rx) = ApprovalBroker::new(Duration::from_secs(5));
        let broker = std::sync::Arc::new(broker);

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.request(request("c2")).await })
        };
        let _ = rx.recv().await;
        assert!(broker.deny("c2", Some("too risky".into())));

        match waiter.await.unwrap() {
            ApprovalDecision::Denied { reason } => assert_eq!(reason, "too risky"),
            other => panic!("expected denied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_defaults_to_deny() {
        let (broker, _rx) = ApprovalBroker::new(Duration::from_millis(20));
        let decision = broker.request(request("c3")).await;
        assert!(matches!(decision, ApprovalDecision::Denied { .. }));
        assert!(broker.list_pending().is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_not_approvable() {
        let (broker, _rx) = ApprovalBroker::new(Duration::from_secs(1));
        assert!(!broker.approve("ghost"));
        assert!(!broker.deny("ghost", None));
    }
}
