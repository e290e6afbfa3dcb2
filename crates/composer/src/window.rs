//! Conversation-window rendering.
//!
//! The window is built backwards from the most recent turn until its char
//! budget is exhausted. Individual turns are hard-truncated before
//! inclusion, and everything older than the cut collapses into a single
//! `[N older turns omitted]` marker line.

use pl_domain::turn::Turn;

use crate::compose::floor_char_boundary;

#[derive(Debug, Clone, Copy)]
pub struct WindowLimits {
    pub budget_chars: usize,
    pub max_user_chars: usize,
    pub max_assistant_chars: usize,
}

/// Render the newest slice of history that fits the budget.
pub fn render_window(history: &[Turn], limits: &WindowLimits) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut used = 0usize;
    let mut included = 0usize;

    for turn in history.iter().rev() {
        let line = render_turn(turn, limits);
        let cost = line.len() + 1;
        if used + cost > limits.budget_chars && included > 0 {
            break;
        }
        if used + cost > limits.budget_chars {
            // Budget too small for even one turn: include a clipped version.
            let boundary = floor_char_boundary(&line, limits.budget_chars.saturating_sub(1));
            lines.push(line[..boundary].to_string());
            included += 1;
            used = limits.budget_chars;
            break;
        }
        used += cost;
        included += 1;
        lines.push(line);
    }

    let omitted = history.len() - included;
    if omitted > 0 {
        lines.push(format!("[{omitted} older turns omitted]"));
    }

    lines.reverse();
    lines.join("\n")
}

fn render_turn(turn: &Turn, limits: &WindowLimits) -> String {
    match turn {
        Turn::User { text, .. } => {
            format!("User: {}", clip(text, limits.max_user_chars))
        }
        Turn::Assistant {
            text, tool_calls, ..
        } => {
            let mut line = format!("Assistant: {}", clip(text, limits.max_assistant_chars));
            if !tool_calls.is_empty() {
                let names: Vec<&str> = tool_calls.iter().map(|c| c.tool_name.as_str()).collect();
                line.push_str(&format!(" [called: {}]", names.join(", ")));
            }
            line
        }
        Turn::Tool { observation, .. } => format!(
            "Tool {}: {}",
            observation.tool_name,
            clip(&observation.content, limits.max_assistant_chars)
        ),
        Turn::Summary { text, .. } => format!("[Earlier conversation summary] {text}"),
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let boundary = floor_char_boundary(text, max_chars);
    format!("{}…", &text[..boundary])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> WindowLimits {
        WindowLimits {
            budget_chars: 200,
            max_user_chars: 2_000,
            max_assistant_chars: 4_000,
        }
    }

    #[test]
    fn newest_turns_win() {
        let history: Vec<Turn> = (0..50).map(|i| Turn::user(format!("message {i}"))).collect();
        let window = render_window(&history, &limits());
        assert!(window.contains("message 49"));
        assert!(!window.contains("message 0\n"));
        assert!(window.starts_with('['));
        assert!(window.contains("older turns omitted]"));
    }

    #[test]
    fn no_marker_when_everything_fits() {
        let history = vec![Turn::user("hi"), Turn::assistant("hello")];
        let window = render_window(&history, &limits());
        assert!(!window.contains("omitted"));
        assert_eq!(window, "User: hi\nAssistant: hello");
    }

    #[test]
    fn user_turns_hard_truncated() {
        let history = vec![Turn::user("x".repeat(5_000))];
        let window = render_window(
            &history,
            &WindowLimits {
                budget_chars: 100_000,
                max_user_chars: 2_000,
                max_assistant_chars: 4_000,
            },
        );
        assert!(window.len() < 2_100);
        assert!(window.ends_with('…'));
    }

    #[test]
    fn tool_calls_are_annotated() {
        let history = vec![Turn::assistant_with_calls(
            "let me check",
            vec![pl_domain::convo::ToolCall {
                call_id: "t1".into(),
                tool_name: "read_file".into(),
                arguments: serde_json::json!({}),
            }],
        )];
        let window = render_window(&history, &limits());
        assert!(window.contains("[called: read_file]"));
    }

    #[test]
    fn empty_history_is_empty() {
        assert_eq!(render_window(&[], &limits()), "");
    }
}
