use serde::{Deserialize, Serialize};

use super::{AccessConfig, Config, GuardConfig, QueueConfig, TokenBudgets};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hot reload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The reload-eligible slice of [`Config`]. Live handlers dereference this
/// through a shared pointer on every use; a reload swaps the pointer.
///
/// Provider endpoints and channel credentials are snapshotted at start and
/// are NOT part of this slice — changing them requires a restart.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReloadableConfig {
    pub access: AccessConfig,
    pub guard: GuardConfig,
    pub queue: QueueConfig,
    pub budgets: TokenBudgets,
}

impl ReloadableConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            access: config.access.clone(),
            guard: config.tools.guard.clone(),
            queue: config.queue.clone(),
            budgets: config.composer.budgets.clone(),
        }
    }
}

/// Outcome of comparing a freshly loaded config against the running one.
#[derive(Debug, Default)]
pub struct ReloadPlan {
    /// Eligible sections that actually changed.
    pub changed: Vec<String>,
    /// Ineligible sections that changed and will be ignored.
    pub rejected: Vec<String>,
}

impl ReloadPlan {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty() && self.rejected.is_empty()
    }
}

/// Diff `current` against `incoming` and report which sections a hot reload
/// would apply and which it must reject.
pub fn plan_reload(current: &Config, incoming: &Config) -> ReloadPlan {
    let mut plan = ReloadPlan::default();

    let mut diff = |name: &str, changed: bool, eligible: bool| {
        if !changed {
            return;
        }
        if eligible {
            plan.changed.push(name.to_string());
        } else {
            plan.rejected.push(name.to_string());
        }
    };

    diff(
        "access",
        serialized(&current.access) != serialized(&incoming.access),
        true,
    );
    diff(
        "tools.guard",
        serialized(&current.tools.guard) != serialized(&incoming.tools.guard),
        true,
    );
    diff(
        "queue",
        serialized(&current.queue) != serialized(&incoming.queue),
        true,
    );
    diff(
        "composer.budgets",
        serialized(&current.composer.budgets) != serialized(&incoming.composer.budgets),
        true,
    );
    diff(
        "providers.endpoints",
        serialized(&current.providers.endpoints) != serialized(&incoming.providers.endpoints),
        false,
    );
    diff(
        "sessions.state_path",
        current.sessions.state_path != incoming.sessions.state_path,
        false,
    );

    plan
}

fn serialized<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_config_is_a_noop() {
        let config = Config::default();
        assert!(plan_reload(&config, &config.clone()).is_noop());
    }

    #[test]
    fn guard_change_is_eligible() {
        let current = Config::default();
        let mut incoming = current.clone();
        incoming.tools.guard.denied_patterns.push("shutdown".into());
        let plan = plan_reload(&current, &incoming);
        assert_eq!(plan.changed, vec!["tools.guard"]);
        assert!(plan.rejected.is_empty());
    }

    #[test]
    fn endpoint_change_is_rejected() {
        let current = Config::default();
        let mut incoming = current.clone();
        incoming
            .providers
            .endpoints
            .insert("new".into(), super::super::ProviderEndpoint::default());
        let plan = plan_reload(&current, &incoming);
        assert!(plan.changed.is_empty());
        assert_eq!(plan.rejected, vec!["providers.endpoints"]);
    }
}
