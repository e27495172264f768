use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ToolCallId};
use crate::tools::{ToolInput, ToolInvocation, ToolOutcome};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A transcript entry. Assistant messages carry the tool records of their turn.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolRecord>,
}

/// One executed invocation as recorded on the assistant message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: ToolCallId,
    pub name: String,
    pub input: ToolInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolRecord {
    /// Merge an invocation with its outcome. The outcome must belong to the invocation.
    pub fn merge(invocation: ToolInvocation, outcome: ToolOutcome) -> Self {
        debug_assert_eq!(invocation.id, outcome.invocation_id);
        Self {
            id: invocation.id,
            name: invocation.name,
            input: invocation.input,
            output: outcome.result,
            error: outcome.error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_tool_calls(mut self, records: Vec<ToolRecord>) -> Self {
        self.tool_calls = records;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_omits_empty_tool_calls() {
        let json = serde_json::to_value(Message::user("hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn assistant_message_carries_records() {
        let invocation = ToolInvocation::new("bash", ToolInput::new());
        let outcome = ToolOutcome::failure(invocation.id.clone(), "permission denied");
        let record = ToolRecord::merge(invocation.clone(), outcome);
        let msg = Message::assistant("done").with_tool_calls(vec![record]);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["tool_calls"][0]["id"], invocation.id.as_str());
        assert_eq!(json["tool_calls"][0]["error"], "permission denied");
        assert!(json["tool_calls"][0].get("output").is_none());
        assert!(msg.tool_calls[0].is_error());
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), r#""assistant""#);
    }
}
