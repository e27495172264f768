use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::{ProjectId, SessionId, ToolCallId};
use crate::permissions::PermissionBehavior;

/// Tool input: a JSON object keyed by parameter name.
pub type ToolInput = serde_json::Map<String, serde_json::Value>;

/// A tool call extracted from assistant text. Consumed exactly once by dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: ToolCallId,
    pub name: String,
    pub input: ToolInput,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, input: ToolInput) -> Self {
        Self {
            id: ToolCallId::new(),
            name: name.into(),
            input,
        }
    }
}

/// Exactly one per invocation: either a result or an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    pub invocation_id: ToolCallId,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(invocation_id: ToolCallId, result: serde_json::Value) -> Self {
        Self {
            invocation_id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(invocation_id: ToolCallId, error: impl Into<String>) -> Self {
        Self {
            invocation_id,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Shell,
    FileSystem,
    Search,
    Web,
    Interaction,
    Custom(String),
}

/// Tool metadata, sent to the completion provider and consulted by the coordinator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub category: ToolCategory,
    pub dangerous: bool,
    pub requires_confirmation: bool,
}

/// Fresh per dispatch. `cancel` is the turn's cancellation token.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub project_id: ProjectId,
    pub session_id: SessionId,
    pub project_root: PathBuf,
    pub cancel: CancellationToken,
    pub permissions: BTreeMap<String, PermissionBehavior>,
}

/// Trait implemented by each tool. Failures are returned, never thrown;
/// the coordinator also converts panics into error outcomes.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    fn category(&self) -> ToolCategory;

    fn dangerous(&self) -> bool {
        false
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        input: ToolInput,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
            category: self.category(),
            dangerous: self.dangerous(),
            requires_confirmation: self.requires_confirmation(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("timed out after {}ms{}", timeout.as_millis(), partial_output(stdout, stderr))]
    Timeout {
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
    #[error("cancelled")]
    Cancelled,
    #[error("not found: {0}")]
    NotFound(String),
}

/// Whatever a timed-out command printed before it was killed.
fn partial_output(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    if !stdout.is_empty() {
        out.push_str("\nstdout:\n");
        out.push_str(stdout);
    }
    if !stderr.is_empty() {
        out.push_str("\nstderr:\n");
        out.push_str(stderr);
    }
    out
}

/// Typed accessors over [`ToolInput`].
pub mod input {
    use std::borrow::Cow;

    use serde_json::Value;

    use super::{ToolError, ToolInput};

    /// Strings pass through; numbers and booleans are rendered as text.
    fn scalar_text<'a>(value: Option<&'a Value>, key: &str) -> Result<Option<Cow<'a, str>>, ToolError> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(Cow::Borrowed(s.as_str()))),
            Some(Value::Number(n)) => Ok(Some(Cow::Owned(n.to_string()))),
            Some(Value::Bool(b)) => Ok(Some(Cow::Owned(b.to_string()))),
            Some(Value::Array(_) | Value::Object(_)) => {
                Err(ToolError::InvalidArguments(format!("{key} must be a string")))
            }
        }
    }

    pub fn required_str<'a>(input: &'a ToolInput, key: &str) -> Result<Cow<'a, str>, ToolError> {
        scalar_text(input.get(key), key)?
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments(format!("{key} is required")))
    }

    pub fn optional_str<'a>(input: &'a ToolInput, key: &str) -> Result<Option<Cow<'a, str>>, ToolError> {
        Ok(scalar_text(input.get(key), key)?.filter(|s| !s.is_empty()))
    }

    /// Accepts a JSON number or a numeric string.
    pub fn optional_u64(input: &ToolInput, key: &str) -> Result<Option<u64>, ToolError> {
        match input.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| ToolError::InvalidArguments(format!("{key} must be a non-negative integer"))),
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ToolError::InvalidArguments(format!("{key} must be a non-negative integer"))),
            Some(_) => Err(ToolError::InvalidArguments(format!(
                "{key} must be a non-negative integer"
            ))),
        }
    }

    /// Accepts a JSON bool or "true"/"false".
    pub fn optional_bool(input: &ToolInput, key: &str) -> Result<Option<bool>, ToolError> {
        match input.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
            Some(serde_json::Value::String(s)) => match s.trim() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(ToolError::InvalidArguments(format!("{key} must be a boolean"))),
            },
            Some(_) => Err(ToolError::InvalidArguments(format!("{key} must be a boolean"))),
        }
    }
}
