use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_core::tools::{input, Tool, ToolCategory, ToolContext, ToolError, ToolInput};

use crate::process::{BashRequest, ProcessSupervisor};

pub struct BashTool {
    supervisor: Arc<ProcessSupervisor>,
}

impl BashTool {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self { supervisor }
    }
}

/// String values pass through; numbers and booleans are stringified.
fn parse_env(input: &ToolInput) -> Result<BTreeMap<String, String>, ToolError> {
    let mut env = BTreeMap::new();
    let Some(value) = input.get("env") else {
        return Ok(env);
    };
    let map = match value {
        serde_json::Value::Null => return Ok(env),
        serde_json::Value::Object(map) => map,
        _ => return Err(ToolError::InvalidArguments("env must be an object".into())),
    };
    for (key, value) in map {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => {
                return Err(ToolError::InvalidArguments(format!(
                    "env value for {key} must be a string"
                )))
            }
        };
        env.insert(key.clone(), value);
    }
    Ok(env)
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the project, in the foreground with a timeout or detached in the background"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_directory": {
                    "type": "string",
                    "description": "Directory to run in; relative paths resolve against the project root"
                },
                "env": {
                    "type": "object",
                    "description": "Extra environment variables",
                    "additionalProperties": {"type": "string"}
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in milliseconds (max 600000)"
                },
                "run_in_background": {
                    "type": "boolean",
                    "description": "Return immediately with a shellId; poll with bash_output"
                }
            }
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Shell
    }

    fn dangerous(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        input: ToolInput,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let command = input::required_str(&input, "command")?;
        let request = BashRequest {
            command: command.into_owned(),
            working_directory: input::optional_str(&input, "working_directory")?
                .map(|dir| PathBuf::from(dir.into_owned())),
            env: parse_env(&input)?,
            timeout: input::optional_u64(&input, "timeout")?.map(Duration::from_millis),
            run_in_background: input::optional_bool(&input, "run_in_background")?.unwrap_or(false),
        };

        let outcome = self
            .supervisor
            .bash(&ctx.project_root, request, &ctx.cancel)
            .await?;
        serde_json::to_value(outcome).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}
