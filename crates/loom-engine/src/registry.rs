use std::collections::HashMap;
use std::sync::Arc;

use loom_core::tools::{Tool, ToolCategory, ToolDefinition};

/// Where a registered tool came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolSource {
    BuiltIn,
    Custom(String),
}

struct ToolEntry {
    tool: Arc<dyn Tool>,
    source: ToolSource,
}

/// Name-keyed tool lookup. Registering an existing name replaces it.
pub struct ToolRegistry {
    tools: HashMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>, source: ToolSource) {
        let name = tool.name().to_string();
        self.tools.insert(name, ToolEntry { tool, source });
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| Arc::clone(&e.tool))
    }

    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|e| e.tool.to_definition())
    }

    pub fn source(&self, name: &str) -> Option<&ToolSource> {
        self.tools.get(name).map(|e| &e.source)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// All definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|e| e.tool.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn by_category(&self, category: &ToolCategory) -> Vec<ToolDefinition> {
        self.definitions()
            .into_iter()
            .filter(|d| &d.category == category)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
