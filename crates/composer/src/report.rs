use serde::Serialize;

/// Outcome of composing one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerOutcome {
    Included,
    Trimmed,
    Dropped,
    Empty,
}

/// Per-layer accounting row.
#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    pub name: &'static str,
    pub priority: u8,
    pub raw_tokens: usize,
    pub final_tokens: usize,
    pub outcome: LayerOutcome,
}

/// Machine-readable composition report, for tracing and tests.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ComposeReport {
    pub layers: Vec<LayerReport>,
    pub total_tokens: usize,
    pub budget_tokens: usize,
}

impl ComposeReport {
    pub fn count(&self, outcome: LayerOutcome) -> usize {
        self.layers.iter().filter(|l| l.outcome == outcome).count()
    }
}
