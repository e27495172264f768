use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use loom_core::permissions::{PermissionBehavior, PermissionDecision};

/// Per-tool allow/deny rules. Tools without a rule resolve to [`PermissionDecision::Ask`].
#[derive(Debug, Default)]
pub struct PermissionGate {
    rules: RwLock<BTreeMap<String, PermissionBehavior>>,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: BTreeMap<String, PermissionBehavior>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn decision(&self, tool_name: &str) -> PermissionDecision {
        self.rules.read().get(tool_name).copied().into()
    }

    pub fn set(&self, tool_name: impl Into<String>, behavior: PermissionBehavior) {
        let tool_name = tool_name.into();
        debug!(tool = %tool_name, ?behavior, "permission rule set");
        self.rules.write().insert(tool_name, behavior);
    }

    /// Returns the removed rule, if any.
    pub fn remove(&self, tool_name: &str) -> Option<PermissionBehavior> {
        self.rules.write().remove(tool_name)
    }

    /// Rules sorted by tool name.
    pub fn list(&self) -> Vec<(String, PermissionBehavior)> {
        self.rules
            .read()
            .iter()
            .map(|(name, behavior)| (name.clone(), *behavior))
            .collect()
    }

    pub fn reset(&self) {
        self.rules.write().clear();
    }

    pub fn snapshot(&self) -> BTreeMap<String, PermissionBehavior> {
        self.rules.read().clone()
    }
}
