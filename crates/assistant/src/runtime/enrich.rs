//! Inbound enrichment.
//!
//! Attachments become bracketed descriptors in the user text so the model
//! knows what arrived even when no captioner is wired in; group messages
//! carry their sender so multi-party chats stay readable.

use pl_domain::channel::{AttachmentRef, InboundMessage};

/// Render an inbound message into the text handed to the agent.
pub fn enrich_content(msg: &InboundMessage) -> String {
    let mut text = String::new();

    if msg.is_group {
        text.push_str(&format!("[from {}] ", msg.from_id));
    }
    text.push_str(msg.content.trim());

    for att in &msg.attachments {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&describe(att));
    }

    text
}

/// Join a drained batch into one agent input. More than one message gets
/// the collected-messages header.
pub fn combine_batch(texts: &[String]) -> String {
    match texts {
        [] => String::new(),
        [single] => single.clone(),
        many => {
            let mut out =
                String::from("[multiple messages received while the previous reply was being written]\n");
            for text in many {
                out.push_str("- ");
                out.push_str(text);
                out.push('\n');
            }
            out
        }
    }
}

fn describe(att: &AttachmentRef) -> String {
    let mime = att.mime.as_deref().unwrap_or("unknown type");
    let name = att.file_name.as_deref().unwrap_or("unnamed");
    match att.size_bytes {
        Some(bytes) => format!("[attachment: {mime}, {}, \"{name}\"]", human_size(bytes)),
        None => format!("[attachment: {mime}, \"{name}\"]"),
    }
}

fn human_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{bytes} B")
    }
}
