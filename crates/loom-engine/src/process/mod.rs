//! Shell process supervision: foreground runs with a timeout, and detached
//! background shells tracked in a [`ShellTable`] until they exit or are killed.

mod buffer;
mod path;
mod signal;
mod supervisor;
mod table;

use std::path::PathBuf;
use std::time::Duration;

use loom_core::ids::ShellId;
use loom_core::tools::ToolError;

pub use buffer::OutputBuffer;
pub use path::{normalize, resolve_working_directory};
pub use signal::KillOutcome;
pub use supervisor::{
    BackgroundStarted, BashOutcome, BashRequest, ForegroundOutput, KillReport, ProcessSupervisor,
    ShellOutput, ShellSummary, SupervisorConfig,
};
pub use table::{ExitInfo, ShellHandle, ShellTable};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{} is outside the project root {}", path.display(), root.display())]
    AccessDenied { path: PathBuf, root: PathBuf },

    #[error("failed to spawn {shell}: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {}ms", timeout.as_millis())]
    Timeout {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("command cancelled")]
    Cancelled,

    #[error("unknown shell id: {0}")]
    UnknownShell(ShellId),

    #[error("process i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProcessError> for ToolError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::AccessDenied { .. } => ToolError::AccessDenied(err.to_string()),
            ProcessError::Timeout { timeout, stdout, stderr } => {
                ToolError::Timeout { timeout, stdout, stderr }
            }
            ProcessError::Cancelled => ToolError::Cancelled,
            ProcessError::UnknownShell(_) => ToolError::NotFound(err.to_string()),
            ProcessError::Spawn { .. } | ProcessError::Io(_) => ToolError::ExecutionFailed(err.to_string()),
        }
    }
}
