//! Tool registry implementation.

use dashmap::DashMap;
use std::sync::Arc;

use agent_runtime_core::{
    traits::{Tool, ToolRegistry},
    types::ToolDefinition,
};

/// Default tool registry using DashMap.
///
/// Registering a name twice replaces the earlier tool.
#[derive(Default)]
pub struct DefaultToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl DefaultToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl ToolRegistry for DefaultToolRegistry {
    fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replacing already registered tool");
        } else {
            tracing::info!(tool = %name, "Registering tool");
        }
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| entry.value().clone())
    }

    fn list(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<_> = self
            .tools
            .iter()
            .map(|entry| entry.value().definition().clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_core::mocks::RecordingTool;
    use agent_runtime_core::types::ToolCategory;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> Arc<dyn Tool> {
        Arc::new(RecordingTool::new(
            ToolDefinition::new(name, ToolCategory::Plan).with_description(description),
            json!({}),
        ))
    }

    #[test]
    fn test_register_and_list_sorted() {
        let registry = DefaultToolRegistry::new();
        registry.register(tool("plan.update", "update"));
        registry.register(tool("message.notify", "notify"));

        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["message.notify", "plan.update"]);
        assert!(registry.contains("plan.update"));
        assert!(registry.get("shell.exec").is_none());
    }

    #[test]
    fn test_reregistration_last_write_wins() {
        let registry = DefaultToolRegistry::new();
        registry.register(tool("plan.update", "first"));
        registry.register(tool("plan.update", "second"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.definition("plan.update").unwrap().description, "second");
    }
}
