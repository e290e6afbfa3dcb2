//! Proactive context pruning for the live message list.
//!
//! Tool observations age out long before the model signals overflow: past
//! `soft_age_turns` assistant messages their content is clipped (id and a
//! head retained), past `hard_age_turns` it collapses to a one-line stub.
//! User and assistant messages are never touched.

use pl_domain::config::PruneConfig;
use pl_domain::convo::{ContentPart, Message, MessageContent, Role};

/// Prune tool-result content by age. Returns a new message list.
pub fn prune_messages(messages: &[Message], config: &PruneConfig) -> Vec<Message> {
    let soft_cutoff = assistant_age_cutoff(messages, config.soft_age_turns);
    let hard_cutoff = assistant_age_cutoff(messages, config.hard_age_turns);

    messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            if msg.role != Role::Tool || i >= soft_cutoff {
                return msg.clone();
            }
            let hard = i < hard_cutoff;
            Message {
                role: msg.role,
                content: prune_content(&msg.content, config.soft_keep_chars, hard),
            }
        })
        .collect()
}

/// Clip every retained tool result to `max_chars` regardless of age. Used
/// while recovering from a context-overflow error.
pub fn clamp_tool_results(messages: &[Message], max_chars: usize) -> Vec<Message> {
    messages
        .iter()
        .map(|msg| {
            if msg.role != Role::Tool {
                return msg.clone();
            }
            Message {
                role: msg.role,
                content: prune_content(&msg.content, max_chars, false),
            }
        })
        .collect()
}

/// Index before which a message is older than the last `age_turns`
/// assistant messages. Everything at or past the cutoff is protected.
fn assistant_age_cutoff(messages: &[Message], age_turns: usize) -> usize {
    if age_turns == 0 {
        return messages.len();
    }
    let mut seen = 0;
    for (i, msg) in messages.iter().enumerate().rev() {
        if msg.role == Role::Assistant {
            seen += 1;
            if seen >= age_turns {
                return i;
            }
        }
    }
    0 // not enough assistant turns yet: nothing is old enough to prune
}

fn prune_content(content: &MessageContent, keep_chars: usize, hard: bool) -> MessageContent {
    match content {
        MessageContent::Text(text) => MessageContent::Text(clip(text, keep_chars, hard)),
        MessageContent::Parts(parts) => MessageContent::Parts(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => ContentPart::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: clip(content, keep_chars, hard),
                        is_error: *is_error,
                    },
                    other => other.clone(),
                })
                .collect(),
        ),
    }
}

fn clip(text: &str, keep_chars: usize, hard: bool) -> String {
    if hard {
        let head: String = text.chars().take(80).collect();
        return format!("[result pruned; began: {head}…]");
    }
    if text.len() <= keep_chars {
        return text.to_string();
    }
    let mut cut = keep_chars;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[trimmed {} bytes]", &text[..cut], text.len() - cut)
}
