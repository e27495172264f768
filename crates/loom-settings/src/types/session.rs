//! Project, coordinator, and logging settings.
//!
//! Grouped here because each section is small.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectSettings {
    /// Root that every shell working directory must stay inside.
    /// Unset means the current directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl ProjectSettings {
    pub fn root_or(&self, fallback: PathBuf) -> PathBuf {
        self.root.as_ref().map(PathBuf::from).unwrap_or(fallback)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Characters of each tool result shown in the turn summary.
    pub preview_chars: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            preview_chars: 200,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `{"loom_engine::process": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_root_fallback() {
        let p = ProjectSettings::default();
        assert_eq!(p.root_or(PathBuf::from("/work")), PathBuf::from("/work"));
        let p = ProjectSettings { root: Some("/repo".into()) };
        assert_eq!(p.root_or(PathBuf::from("/work")), PathBuf::from("/repo"));
    }

    #[test]
    fn coordinator_omits_unset_prompt() {
        let json = serde_json::to_value(CoordinatorSettings::default()).unwrap();
        assert!(json.get("systemPrompt").is_none());
        assert_eq!(json["previewChars"], 200);
    }

    #[test]
    fn logging_defaults() {
        let l = LoggingSettings::default();
        assert_eq!(l.level, "info");
        assert!(!l.json);
        assert!(l.modules.is_empty());
    }
}
