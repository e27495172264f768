//! Process supervisor settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits for the `bash` tool family.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BashSettings {
    /// Shell binary invoked as `<shell> -c <command>`.
    pub shell: String,
    /// Foreground timeout when a call gives none.
    pub default_timeout_ms: u64,
    /// Upper bound for any requested timeout.
    pub max_timeout_ms: u64,
    /// Per-stream capture cap in bytes.
    pub max_output_bytes: usize,
    /// How long `bash_output` waits when a call gives no timeout.
    pub output_poll_timeout_ms: u64,
    /// Exited background shells kept for a final poll.
    pub finished_retention: usize,
    /// Delay between SIGTERM and SIGKILL in `kill_shell`.
    pub kill_grace_ms: u64,
}

impl Default for BashSettings {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            default_timeout_ms: 30_000,
            max_timeout_ms: 600_000,
            max_output_bytes: 1024 * 1024,
            output_poll_timeout_ms: 30_000,
            finished_retention: 64,
            kill_grace_ms: 2_000,
        }
    }
}

impl BashSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    pub fn output_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.output_poll_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}
