//! Layered system-prompt composer.
//!
//! The system prompt is a concatenation of independently produced layers,
//! sorted by ascending priority and fitted into a token budget. Low
//! priority means protected: overages trim from the highest priority
//! downward, and only sufficiently high-priority layers may be dropped
//! outright.

pub mod cache;
pub mod compose;
pub mod layer;
pub mod layers;
pub mod report;
pub mod sanitize;
pub mod window;

pub use compose::{compose, ComposedPrompt};
pub use layer::{BudgetHint, LayerKind, PromptLayer};
pub use layers::{build_canonical_layers, LayerContext};

/// Approximate chars-per-token multiplier used for all budget math.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a text (ceiling of chars / 4).
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}
