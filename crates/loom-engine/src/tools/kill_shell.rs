use std::sync::Arc;

use async_trait::async_trait;
use loom_core::ids::ShellId;
use loom_core::tools::{input, Tool, ToolCategory, ToolContext, ToolError, ToolInput};

use crate::process::ProcessSupervisor;

pub struct KillShellTool {
    supervisor: Arc<ProcessSupervisor>,
}

impl KillShellTool {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Tool for KillShellTool {
    fn name(&self) -> &str {
        "kill_shell"
    }

    fn description(&self) -> &str {
        "Terminate a background shell"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["shell_id"],
            "properties": {
                "shell_id": {
                    "type": "string",
                    "description": "The shellId returned by a background bash call"
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
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let shell_id = ShellId::from_raw(input::required_str(&input, "shell_id")?);
        let report = self.supervisor.kill(&shell_id).await?;
        serde_json::to_value(report).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}
