use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tools::{ToolDefinition, ToolInvocation};

/// A stored per-tool rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionBehavior {
    Allow,
    Deny,
}

/// Gate answer. `Ask` means no rule is stored for the tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow,
    Deny,
    Ask,
}

impl From<Option<PermissionBehavior>> for PermissionDecision {
    fn from(behavior: Option<PermissionBehavior>) -> Self {
        match behavior {
            Some(PermissionBehavior::Allow) => Self::Allow,
            Some(PermissionBehavior::Deny) => Self::Deny,
            None => Self::Ask,
        }
    }
}

/// Resolves an `Ask` decision for tools flagged dangerous or requiring confirmation.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, invocation: &ToolInvocation, definition: &ToolDefinition) -> bool;
}
