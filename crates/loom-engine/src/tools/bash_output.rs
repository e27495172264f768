use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_core::ids::ShellId;
use loom_core::tools::{input, Tool, ToolCategory, ToolContext, ToolError, ToolInput};

use crate::process::ProcessSupervisor;

/// Polls a background shell started by `bash`.
pub struct BashOutputTool {
    supervisor: Arc<ProcessSupervisor>,
}

impl BashOutputTool {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Tool for BashOutputTool {
    fn name(&self) -> &str {
        "bash_output"
    }

    fn description(&self) -> &str {
        "Wait for a background shell and return its output so far"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["shell_id"],
            "properties": {
                "shell_id": {
                    "type": "string",
                    "description": "The shellId returned by a background bash call"
                },
                "timeout": {
                    "type": "integer",
                    "description": "How long to wait for exit, in milliseconds"
                }
            }
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Shell
    }

    async fn execute(
        &self,
        input: ToolInput,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let shell_id = ShellId::from_raw(input::required_str(&input, "shell_id")?);
        let timeout = input::optional_u64(&input, "timeout")?.map(Duration::from_millis);

        let output = self.supervisor.output(&shell_id, timeout, &ctx.cancel).await?;
        serde_json::to_value(output).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}
