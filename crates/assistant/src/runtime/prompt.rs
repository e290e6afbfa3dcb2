//! Per-turn prompt assembly.
//!
//! Gathers the layer inputs (session snapshot, memory recall, skill
//! instructions, bootstrap files), runs the expensive producers through
//! the epoch-keyed layer cache, and hands the canonical layer set to the
//! composer.

use chrono::Utc;

use pl_composer::cache::{skills_hash, CacheStamp};
use pl_composer::window::{render_window, WindowLimits};
use pl_composer::{build_canonical_layers, compose, ComposedPrompt, LayerContext, CHARS_PER_TOKEN};
use pl_sessions::SessionKey;

use crate::state::AppState;

/// Build the system prompt for one model turn.
pub async fn build_system_prompt(
    state: &AppState,
    key: &SessionKey,
    latest_user_text: &str,
    model_override: Option<&str>,
) -> ComposedPrompt {
    let session_arc = state.sessions.get_or_create(key);
    let key_str = key.to_string();

    // Snapshot under the read lock; producers run lock-free.
    let (facts, active_skills, overrides, history) = {
        let session = session_arc.read();
        (
            session.facts.clone(),
            session.active_skills.clone(),
            session.overrides.clone(),
            session.history.clone(),
        )
    };

    let stamp = CacheStamp {
        skills_hash: skills_hash(active_skills.iter()),
        memory_epoch: state.memory.epoch(),
    };

    // ── Memory recall (cached, epoch-invalidated) ─────────────────
    let memory_block = match state.layer_cache.get(&key_str, "memory", stamp) {
        Some(cached) => cached.unwrap_or_default(),
        None => {
            let block = fetch_memory_block(state, latest_user_text).await;
            state
                .layer_cache
                .insert(&key_str, "memory", stamp, Some(block.clone()));
            block
        }
    };

    // ── Skill instructions (cached on the same stamp) ─────────────
    let skills_text = state
        .layer_cache
        .get_or_produce(&key_str, "skills", stamp, || {
            Some(read_skill_instructions(state, &active_skills))
        })
        .unwrap_or_default();

    // ── Bootstrap + identity files ────────────────────────────────
    let bootstrap_text = read_workspace_files(state, &state.config.composer.bootstrap_files);
    let identity_overrides =
        read_workspace_files(state, &[std::path::PathBuf::from("IDENTITY.md")]);

    // ── Conversation window ───────────────────────────────────────
    let reloadable = state.reloadable();
    let budgets = &reloadable.budgets;
    let window_text = render_window(
        &history,
        &WindowLimits {
            budget_chars: budgets.history * CHARS_PER_TOKEN,
            max_user_chars: state.config.composer.max_user_turn_chars,
            max_assistant_chars: state.config.composer.max_assistant_turn_chars,
        },
    );

    // ── Runtime facts ─────────────────────────────────────────────
    let model_name = model_override
        .map(String::from)
        .or_else(|| overrides.model.clone())
        .unwrap_or_else(|| state.config.providers.primary.clone());
    let runtime_facts = format!(
        "host={} model={model_name} workspace={}",
        hostname(),
        state.config.tools.workspace_root.display()
    );

    let ctx = LayerContext {
        assistant_name: "Parley".into(),
        identity_overrides,
        thinking: overrides.thinking,
        bootstrap_text,
        business_context: render_facts(&facts),
        skills_text,
        memory_block,
        window_text,
        runtime_facts,
        language: overrides.language.clone(),
        now: Utc::now(),
        timezone: state.config.composer.timezone.clone(),
    };

    let context_window = state.model.context_window_tokens(model_override);
    compose(
        &key_str,
        build_canonical_layers(&ctx),
        context_window,
        state.config.composer.system_share,
        budgets,
    )
}

async fn fetch_memory_block(state: &AppState, query: &str) -> String {
    if query.trim().is_empty() {
        return String::new();
    }
    match state.memory.search(query, 5).await {
        Ok(hits) if !hits.is_empty() => hits
            .iter()
            .map(|h| format!("- {}: {}", h.key, h.content))
            .collect::<Vec<_>>()
            .join("\n"),
        Ok(_) => String::new(),
        Err(e) => {
            tracing::warn!(error = %e, "memory recall failed; composing without it");
            String::new()
        }
    }
}

fn read_skill_instructions(
    state: &AppState,
    active: &std::collections::BTreeSet<String>,
) -> String {
    let mut out = String::new();
    for name in active {
        let path = state
            .config
            .tools
            .workspace_root
            .join("skills")
            .join(format!("{name}.md"));
        match std::fs::read_to_string(&path) {
            Ok(body) => {
                out.push_str(&format!("## Skill: {name}\n{body}\n"));
            }
            Err(_) => {
                tracing::debug!(skill = %name, "no instruction file; listing name only");
                out.push_str(&format!("## Skill: {name}\n(no instructions installed)\n"));
            }
        }
    }
    out
}

fn read_workspace_files(state: &AppState, files: &[std::path::PathBuf]) -> String {
    let mut out = String::new();
    for file in files {
        let path = state.config.tools.workspace_root.join(file);
        if let Ok(body) = std::fs::read_to_string(&path) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(body.trim_end());
            out.push('\n');
        }
    }
    out
}

fn render_facts(facts: &std::collections::BTreeMap<String, String>) -> String {
    if facts.is_empty() {
        return String::new();
    }
    let mut out = String::from("Known about this conversation:\n");
    for (key, value) in facts {
        out.push_str(&format!("- {key}: {value}\n"));
    }
    out
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into())
}
