//! Prompt-cache anchor placement.
//!
//! For endpoints supporting ephemeral prompt caching, two positions are
//! annotated: the system message (the stable prefix) and the next-to-last
//! user message (so the cache covers everything up to the live exchange).
//! Endpoints without support ignore the annotation.

use pl_domain::convo::{Message, Role};

/// Message indexes to annotate as cache anchors.
pub fn anchor_indexes(messages: &[Message]) -> Vec<usize> {
    let mut anchors = Vec::with_capacity(2);

    if let Some(idx) = messages.iter().position(|m| m.role == Role::System) {
        anchors.push(idx);
    }

    let user_indexes: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User)
        .map(|(i, _)| i)
        .collect();
    if user_indexes.len() >= 2 {
        let idx = user_indexes[user_indexes.len() - 2];
        if !anchors.contains(&idx) {
            anchors.push(idx);
        }
    }

    anchors
}
