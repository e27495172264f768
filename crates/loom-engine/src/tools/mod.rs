pub mod bash;
pub mod bash_output;
pub mod kill_shell;

use std::sync::Arc;

use crate::process::ProcessSupervisor;
use crate::registry::{ToolRegistry, ToolSource};

/// Registry with the built-in shell tools, all backed by one supervisor.
pub fn create_default_registry(supervisor: Arc<ProcessSupervisor>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(
        Arc::new(bash::BashTool::new(Arc::clone(&supervisor))),
        ToolSource::BuiltIn,
    );
    registry.register(
        Arc::new(bash_output::BashOutputTool::new(Arc::clone(&supervisor))),
        ToolSource::BuiltIn,
    );
    registry.register(
        Arc::new(kill_shell::KillShellTool::new(supervisor)),
        ToolSource::BuiltIn,
    );
    registry
}
