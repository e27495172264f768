use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, ToolCallId};
use crate::state::ExecutionStatus;
use crate::tools::ToolInput;

/// Events published by the coordinator while a turn runs.
/// Per session, events arrive in emission order; tool events follow parse order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "content")]
    Content { session_id: SessionId, text: String },

    #[serde(rename = "tool_call")]
    ToolCall {
        session_id: SessionId,
        invocation_id: ToolCallId,
        tool_name: String,
        input: ToolInput,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        session_id: SessionId,
        invocation_id: ToolCallId,
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },

    /// `message` is already sanitized; raw provider errors never reach subscribers.
    #[serde(rename = "error")]
    Error {
        session_id: SessionId,
        kind: String,
        message: String,
    },

    #[serde(rename = "status")]
    Status {
        session_id: SessionId,
        status: ExecutionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_tool: Option<String>,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::Status { .. } => "status",
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Content { session_id, .. }
            | Self::ToolCall { session_id, .. }
            | Self::ToolResult { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::Status { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_type_matches_event_type() {
        let sid = SessionId::from_raw("sess_1");
        let events = vec![
            SessionEvent::Content { session_id: sid.clone(), text: "hi".into() },
            SessionEvent::ToolCall {
                session_id: sid.clone(),
                invocation_id: ToolCallId::from_raw("toolu_1"),
                tool_name: "bash".into(),
                input: ToolInput::new(),
            },
            SessionEvent::ToolResult {
                session_id: sid.clone(),
                invocation_id: ToolCallId::from_raw("toolu_1"),
                tool_name: "bash".into(),
                result: None,
                error: Some("denied".into()),
                duration_ms: 0,
            },
            SessionEvent::Error {
                session_id: sid.clone(),
                kind: "network_error".into(),
                message: "completion provider unavailable".into(),
            },
            SessionEvent::Status {
                session_id: sid.clone(),
                status: ExecutionStatus::Thinking,
                current_tool: None,
            },
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
            assert_eq!(json["session_id"], "sess_1");
            assert_eq!(event.session_id(), &sid);
        }
    }

    #[test]
    fn tool_result_omits_absent_fields() {
        let event = SessionEvent::ToolResult {
            session_id: SessionId::from_raw("sess_1"),
            invocation_id: ToolCallId::from_raw("toolu_1"),
            tool_name: "bash".into(),
            result: Some(serde_json::json!({"exitCode": 0})),
            error: None,
            duration_ms: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["result"]["exitCode"], 0);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn status_event_roundtrip() {
        let json = r#"{"type":"status","session_id":"sess_1","status":"executing","current_tool":"bash"}"#;
        let event: SessionEvent = serde_json::from_str(json).unwrap();
        match event {
            SessionEvent::Status { status, current_tool, .. } => {
                assert_eq!(status, ExecutionStatus::Executing);
                assert_eq!(current_tool.as_deref(), Some("bash"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
