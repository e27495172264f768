use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ids::SessionId;
use crate::messages::Message;

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("transcript unavailable: {0}")]
    Unavailable(String),
    #[error("write failed: {0}")]
    Write(String),
}

/// Session message log. Appends are ordered per session.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn append(&self, session_id: &SessionId, message: Message) -> Result<(), TranscriptError>;

    async fn history(&self, session_id: &SessionId) -> Result<Vec<Message>, TranscriptError>;
}

/// Process-local transcript. Nothing is persisted.
#[derive(Debug, Default)]
pub struct InMemoryTranscript {
    sessions: Mutex<HashMap<SessionId, Vec<Message>>>,
}

impl InMemoryTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, session_id: &SessionId) -> usize {
        self.sessions.lock().get(session_id).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, session_id: &SessionId) -> bool {
        self.len(session_id) == 0
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscript {
    async fn append(&self, session_id: &SessionId, message: Message) -> Result<(), TranscriptError> {
        self.sessions
            .lock()
            .entry(session_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn history(&self, session_id: &SessionId) -> Result<Vec<Message>, TranscriptError> {
        Ok(self.sessions.lock().get(session_id).cloned().unwrap_or_default())
    }
}
