//! Compaction arithmetic and summary-prompt construction.
//!
//! The store applies the surgery; the agent runner supplies the model. This
//! module holds the pure parts both sides share.

use pl_domain::turn::Turn;

/// Entries kept by the summarize strategy: the newest `keep_ratio` share,
/// never less than one.
pub fn summarize_keep(len: usize, keep_ratio: f64) -> usize {
    ((len as f64 * keep_ratio).floor() as usize).max(1).min(len)
}

/// Entries kept by the truncate strategy: half the threshold.
pub fn truncate_keep(len: usize, threshold: usize) -> usize {
    (threshold / 2).min(len)
}

/// Split history into `(dropped, kept)` for a given keep count.
pub fn split_for_compaction(history: &[Turn], keep: usize) -> (&[Turn], &[Turn]) {
    let cut = history.len().saturating_sub(keep);
    history.split_at(cut)
}

/// Render the dropped range as plain text for the summarizer. Long entries
/// are clipped head+tail so one giant tool result cannot crowd out the
/// conversation.
pub fn conversation_text(turns: &[Turn]) -> String {
    let mut buf = String::new();
    for turn in turns {
        let label = match turn {
            Turn::User { .. } => "User",
            Turn::Assistant { .. } => "Assistant",
            Turn::Tool { .. } => "Tool",
            Turn::Summary { .. } => "Earlier summary",
        };
        buf.push_str(label);
        buf.push_str(": ");
        let text = turn.text();
        if text.len() > 2_000 {
            let head = text.char_indices().nth(1_000).map(|(i, _)| i).unwrap_or(0);
            let tail = text
                .char_indices()
                .rev()
                .nth(499)
                .map(|(i, _)| i)
                .unwrap_or(text.len());
            buf.push_str(&text[..head]);
            buf.push_str(" [...] ");
            buf.push_str(&text[tail..]);
        } else {
            buf.push_str(text);
        }
        buf.push('\n');
    }
    buf
}

/// Instruction for the 2–3 sentence range summary.
pub fn summary_prompt(conversation: &str) -> String {
    format!(
        "Summarize the following conversation history in two to three \
         sentences. Preserve the current goal, decisions made, and any \
         facts learned about the user. Write in present tense; omit \
         greetings.\n\nCONVERSATION:\n{conversation}"
    )
}

/// Instruction for the memory-flush pre-turn: one last chance to persist
/// durable facts before the range is dropped.
pub fn memory_flush_prompt() -> &'static str {
    "The oldest part of this conversation is about to be summarized and \
     dropped. If it contains durable facts worth keeping (names, \
     preferences, commitments, project state), save each one now with the \
     memory_save tool. If there is nothing worth saving, reply with the \
     single word: nothing."
}
