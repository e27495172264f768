use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::messages::Message;
use crate::tools::ToolDefinition;

/// Everything the provider sees for one turn.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Raw assistant text. Tool invocations are embedded in `text` and parsed by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub text: String,
    #[serde(default)]
    pub tokens_used: u64,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), tokens_used: 0 }
    }
}

/// Trait implemented by each completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_are_empty() {
        let req = CompletionRequest::default();
        assert!(req.system_prompt.is_none());
        assert!(req.messages.is_empty());
        assert!(req.tools.is_empty());
    }

    #[test]
    fn completion_tokens_default_to_zero() {
        let c: Completion = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(c, Completion::text("hi"));
    }
}
