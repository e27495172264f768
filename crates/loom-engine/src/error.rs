use loom_core::ids::SessionId;
use loom_core::transcript::TranscriptError;

/// Failures that end a coordinator call without a turn report.
/// Provider and tool failures never show up here; they resolve to events and outcomes.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("session {0} already has a turn in flight")]
    Busy(SessionId),

    #[error("transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    #[error("turn aborted")]
    Aborted,
}

impl CoordinatorError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Busy(_) => "busy",
            Self::Transcript(_) => "transcript",
            Self::Aborted => "aborted",
        }
    }
}
