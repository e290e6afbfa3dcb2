use pl_domain::config::TokenBudgets;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Layer model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a layer may be sacrificed under budget pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Always present, never cut.
    Mandatory,
    /// Present when its producer yields something; never cut once present.
    Optional,
    /// May be truncated to fit.
    Trimmable,
    /// May be removed entirely.
    Droppable,
}

/// A layer's token allowance: an absolute count or one of the shared pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetHint {
    Tokens(usize),
    System,
    Skills,
    Memory,
    History,
}

impl BudgetHint {
    pub fn resolve(&self, budgets: &TokenBudgets) -> usize {
        match self {
            BudgetHint::Tokens(n) => *n,
            BudgetHint::System => budgets.system,
            BudgetHint::Skills => budgets.skills,
            BudgetHint::Memory => budgets.memory,
            BudgetHint::History => budgets.history,
        }
    }
}

/// Lazily produced prompt fragment. Producers run only when the composer
/// actually assembles a prompt; a `None` body omits the layer.
pub struct PromptLayer {
    pub name: &'static str,
    /// Lower = more protected. The canonical layer table runs 0..=80.
    pub priority: u8,
    pub budget: BudgetHint,
    pub kind: LayerKind,
    producer: Box<dyn Fn() -> Option<String> + Send + Sync>,
}

impl PromptLayer {
    pub fn new(
        name: &'static str,
        priority: u8,
        budget: BudgetHint,
        kind: LayerKind,
        producer: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            priority,
            budget,
            kind,
            producer: Box::new(producer),
        }
    }

    /// Fixed-body convenience constructor.
    pub fn fixed(
        name: &'static str,
        priority: u8,
        budget: BudgetHint,
        kind: LayerKind,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        Self::new(name, priority, budget, kind, move || {
            if body.is_empty() {
                None
            } else {
                Some(body.clone())
            }
        })
    }

    pub fn produce(&self) -> Option<String> {
        (self.producer)()
    }

    /// Trimming floor: layers below priority 20 are never trimmed; layers
    /// at 50 and above may be dropped entirely.
    pub fn never_trim(&self) -> bool {
        self.priority < 20 || matches!(self.kind, LayerKind::Mandatory | LayerKind::Optional)
    }

    pub fn may_drop(&self) -> bool {
        self.priority >= 50 && self.kind == LayerKind::Droppable
    }
}

impl std::fmt::Debug for PromptLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptLayer")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("kind", &self.kind)
            .finish()
    }
}
