//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may name any subset of fields and the rest keep their defaults.

mod bash;
mod session;

pub use bash::*;
pub use session::*;

use std::collections::BTreeMap;

use loom_core::permissions::PermissionBehavior;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// Loaded from `~/.loom/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "bash": { "defaultTimeoutMs": 10000 },
///   "permissions": { "bash": "deny" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoomSettings {
    pub project: ProjectSettings,
    /// Process supervisor limits.
    pub bash: BashSettings,
    pub coordinator: CoordinatorSettings,
    /// Stored per-tool rules. Tools without a rule resolve to `ask`.
    pub permissions: BTreeMap<String, PermissionBehavior>,
    pub logging: LoggingSettings,
}

impl LoomSettings {
    /// Reject combinations the supervisor cannot honor.
    pub fn validate(&self) -> Result<()> {
        let bash = &self.bash;
        if bash.shell.trim().is_empty() {
            return Err(SettingsError::InvalidValue("bash.shell must not be empty".into()));
        }
        if bash.default_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "bash.defaultTimeoutMs must be greater than zero".into(),
            ));
        }
        if bash.default_timeout_ms > bash.max_timeout_ms {
            return Err(SettingsError::InvalidValue(format!(
                "bash.defaultTimeoutMs ({}) exceeds bash.maxTimeoutMs ({})",
                bash.default_timeout_ms, bash.max_timeout_ms
            )));
        }
        if bash.max_output_bytes == 0 {
            return Err(SettingsError::InvalidValue(
                "bash.maxOutputBytes must be greater than zero".into(),
            ));
        }
        if self.coordinator.preview_chars == 0 {
            return Err(SettingsError::InvalidValue(
                "coordinator.previewChars must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
