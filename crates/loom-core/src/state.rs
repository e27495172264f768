use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Thinking,
    Executing,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// A turn is in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Thinking | Self::Executing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Thinking => "thinking",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Per-session execution snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    pub current_tool: Option<String>,
    pub tokens_used: u64,
    pub start_time: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn is_busy(&self) -> bool {
        self.status.is_busy()
    }

    /// Enter `thinking` for a new turn. Token usage carries over.
    pub fn begin_turn(&mut self) {
        self.status = ExecutionStatus::Thinking;
        self.current_tool = None;
        self.start_time = Some(Utc::now());
    }

    pub fn finish(&mut self, status: ExecutionStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.current_tool = None;
    }
}
