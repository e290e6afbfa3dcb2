//! Layer assembly under a token budget.

use pl_domain::config::TokenBudgets;
use pl_domain::trace::TraceEvent;

use crate::layer::PromptLayer;
use crate::report::{ComposeReport, LayerOutcome, LayerReport};
use crate::{estimate_tokens, CHARS_PER_TOKEN};

const TRIM_MARKER: &str = "\n[truncated to fit budget]";

/// The assembled system prompt plus its accounting report.
#[derive(Debug)]
pub struct ComposedPrompt {
    pub text: String,
    pub report: ComposeReport,
}

struct Piece {
    name: &'static str,
    priority: u8,
    kind_never_trim: bool,
    kind_may_drop: bool,
    raw_tokens: usize,
    body: String,
    outcome: LayerOutcome,
}

/// Compose layers into one system prompt.
///
/// Layers are ordered by ascending priority. Every layer at priority ≥ 20
/// is first clamped to its own budget; then the whole prompt is fitted to
/// `system_share` of the context window by cutting from the highest
/// priority downward — dropping layers that allow it, trimming the rest.
pub fn compose(
    session_key: &str,
    mut layers: Vec<PromptLayer>,
    context_window_tokens: usize,
    system_share: f64,
    budgets: &TokenBudgets,
) -> ComposedPrompt {
    layers.sort_by_key(|l| l.priority);

    let total_budget = ((context_window_tokens as f64) * system_share) as usize;

    // ── Produce and per-layer clamp ───────────────────────────────
    let mut pieces: Vec<Piece> = Vec::with_capacity(layers.len());
    for layer in &layers {
        let Some(raw) = layer.produce() else {
            pieces.push(Piece {
                name: layer.name,
                priority: layer.priority,
                kind_never_trim: layer.never_trim(),
                kind_may_drop: layer.may_drop(),
                raw_tokens: 0,
                body: String::new(),
                outcome: LayerOutcome::Empty,
            });
            continue;
        };

        let raw_tokens = estimate_tokens(&raw);
        let layer_budget = layer.budget.resolve(budgets);
        let (body, outcome) = if !layer.never_trim() && raw_tokens > layer_budget {
            (
                truncate_to_tokens(&raw, layer_budget),
                LayerOutcome::Trimmed,
            )
        } else {
            (raw, LayerOutcome::Included)
        };

        pieces.push(Piece {
            name: layer.name,
            priority: layer.priority,
            kind_never_trim: layer.never_trim(),
            kind_may_drop: layer.may_drop(),
            raw_tokens,
            body,
            outcome,
        });
    }

    // ── Fit the total ─────────────────────────────────────────────
    let mut total: usize = pieces.iter().map(|p| estimate_tokens(&p.body)).sum();

    if total > total_budget {
        // Highest priority first: least protected pay first.
        let mut order: Vec<usize> = (0..pieces.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(pieces[i].priority));

        for i in order {
            if total <= total_budget {
                break;
            }
            let piece = &mut pieces[i];
            if piece.body.is_empty() {
                continue;
            }
            let piece_tokens = estimate_tokens(&piece.body);

            if piece.kind_may_drop {
                total -= piece_tokens;
                piece.body.clear();
                piece.outcome = LayerOutcome::Dropped;
                continue;
            }
            if piece.kind_never_trim {
                continue;
            }

            let overage = total - total_budget;
            let target = piece_tokens.saturating_sub(overage);
            if target == 0 {
                total -= piece_tokens;
                piece.body.clear();
                piece.outcome = LayerOutcome::Dropped;
            } else {
                piece.body = truncate_to_tokens(&piece.body, target);
                total -= piece_tokens - estimate_tokens(&piece.body);
                piece.outcome = LayerOutcome::Trimmed;
            }
        }

        if total > total_budget {
            tracing::warn!(
                total_tokens = total,
                budget_tokens = total_budget,
                "protected layers alone exceed the system-prompt budget"
            );
        }
    }

    // ── Assemble ──────────────────────────────────────────────────
    let mut text = String::new();
    let mut reports = Vec::with_capacity(pieces.len());
    for piece in &pieces {
        if !piece.body.is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&piece.body);
        }
        reports.push(LayerReport {
            name: piece.name,
            priority: piece.priority,
            raw_tokens: piece.raw_tokens,
            final_tokens: estimate_tokens(&piece.body),
            outcome: piece.outcome,
        });
    }

    let report = ComposeReport {
        layers: reports,
        total_tokens: estimate_tokens(&text),
        budget_tokens: total_budget,
    };

    TraceEvent::PromptComposed {
        session_key: session_key.to_string(),
        layers_included: report.count(LayerOutcome::Included),
        layers_trimmed: report.count(LayerOutcome::Trimmed),
        layers_dropped: report.count(LayerOutcome::Dropped),
        estimated_tokens: report.total_tokens,
    }
    .emit();

    ComposedPrompt { text, report }
}

/// Truncate to a token allowance at a char boundary, appending a marker.
fn truncate_to_tokens(text: &str, tokens: usize) -> String {
    let max_chars = (tokens * CHARS_PER_TOKEN).saturating_sub(TRIM_MARKER.len());
    if text.len() <= max_chars {
        return text.to_string();
    }
    let boundary = floor_char_boundary(text, max_chars);
    let mut out = text[..boundary].to_string();
    out.push_str(TRIM_MARKER);
    out
}

/// Largest index ≤ `idx` that falls on a char boundary.
pub(crate) fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{BudgetHint, LayerKind, PromptLayer};

    fn budgets() -> TokenBudgets {
        TokenBudgets::default()
    }

    fn fixed(
        name: &'static str,
        priority: u8,
        budget: BudgetHint,
        kind: LayerKind,
        chars: usize,
    ) -> PromptLayer {
        PromptLayer::fixed(name, priority, budget, kind, "x".repeat(chars))
    }

    #[test]
    fn layers_concatenate_in_priority_order() {
        let layers = vec![
            PromptLayer::fixed("later", 60, BudgetHint::Tokens(100), LayerKind::Trimmable, "B"),
            PromptLayer::fixed("core", 0, BudgetHint::System, LayerKind::Mandatory, "A"),
        ];
        let composed = compose("s", layers, 100_000, 0.4, &budgets());
        assert_eq!(composed.text, "A\n\nB");
    }

    #[test]
    fn total_never_exceeds_budget_share() {
        // Window 1000 tokens, share 0.4 → 400-token prompt budget.
        let layers = vec![
            fixed("core", 0, BudgetHint::Tokens(200), LayerKind::Mandatory, 400),
            fixed("skills", 40, BudgetHint::Tokens(500), LayerKind::Trimmable, 4_000),
            fixed("memory", 50, BudgetHint::Tokens(500), LayerKind::Droppable, 4_000),
        ];
        let composed = compose("s", layers, 1_000, 0.4, &budgets());
        assert!(
            composed.report.total_tokens <= 400,
            "got {} tokens",
            composed.report.total_tokens
        );
    }

    #[test]
    fn droppable_layers_go_first() {
        let layers = vec![
            fixed("core", 0, BudgetHint::Tokens(500), LayerKind::Mandatory, 400),
            fixed("business", 20, BudgetHint::Tokens(500), LayerKind::Trimmable, 2_000),
            fixed("memory", 50, BudgetHint::Tokens(500), LayerKind::Droppable, 1_000),
        ];
        // 400-token budget: memory dropped entirely, business trimmed.
        let composed = compose("s", layers, 1_000, 0.4, &budgets());
        let memory = composed
            .report
            .layers
            .iter()
            .find(|l| l.name == "memory")
            .unwrap();
        assert_eq!(memory.outcome, LayerOutcome::Dropped);
        let business = composed
            .report
            .layers
            .iter()
            .find(|l| l.name == "business")
            .unwrap();
        assert_eq!(business.outcome, LayerOutcome::Trimmed);
    }

    #[test]
    fn protected_layers_survive_untouched() {
        let layers = vec![
            fixed("core", 0, BudgetHint::Tokens(50), LayerKind::Mandatory, 1_000),
            fixed("safety", 5, BudgetHint::Tokens(50), LayerKind::Mandatory, 1_000),
        ];
        let composed = compose("s", layers, 1_000, 0.4, &budgets());
        for layer in &composed.report.layers {
            assert_eq!(layer.outcome, LayerOutcome::Included);
            assert_eq!(layer.final_tokens, layer.raw_tokens);
        }
    }

    #[test]
    fn per_layer_budget_clamps_before_total() {
        let layers = vec![fixed(
            "skills",
            40,
            BudgetHint::Tokens(10),
            LayerKind::Trimmable,
            1_000,
        )];
        let composed = compose("s", layers, 1_000_000, 0.4, &budgets());
        let skills = &composed.report.layers[0];
        assert_eq!(skills.outcome, LayerOutcome::Trimmed);
        assert!(skills.final_tokens <= 10);
        assert!(composed.text.contains("[truncated to fit budget]"));
    }

    #[test]
    fn empty_producer_yields_empty_outcome() {
        let layer = PromptLayer::new(
            "thinking",
            12,
            BudgetHint::Tokens(200),
            LayerKind::Optional,
            || None,
        );
        let composed = compose("s", vec![layer], 1_000, 0.4, &budgets());
        assert_eq!(composed.report.layers[0].outcome, LayerOutcome::Empty);
        assert!(composed.text.is_empty());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(100);
        let out = truncate_to_tokens(&text, 10);
        assert!(out.ends_with(TRIM_MARKER));
        // Must not panic and must stay valid UTF-8 (implicit in String).
    }
}
