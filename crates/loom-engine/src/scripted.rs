use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use loom_core::errors::ProviderError;
use loom_core::provider::{Completion, CompletionProvider, CompletionRequest};

/// One canned provider reply.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Text(Completion),
    Error(ProviderError),
    /// Wait, then yield the inner response.
    Delay(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(Completion::text(text))
    }

    pub fn with_tokens(text: impl Into<String>, tokens_used: u64) -> Self {
        Self::Text(Completion {
            text: text.into(),
            tokens_used,
        })
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Provider that replays responses in order and records every request.
/// Once the script runs out, calls fail with [`ProviderError::Exhausted`].
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: ScriptedResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front();
        let mut current = next.ok_or(ProviderError::Exhausted)?;
        loop {
            match current {
                ScriptedResponse::Text(completion) => return Ok(completion),
                ScriptedResponse::Error(e) => return Err(e),
                ScriptedResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}
