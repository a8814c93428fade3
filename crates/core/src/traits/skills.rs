//! Skills traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::Result;
use crate::types::{AgentContext, ToolDefinition};

/// A named capability agents can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static metadata: name, category, limits, schema.
    fn definition(&self) -> &ToolDefinition;

    fn name(&self) -> &str {
        &self.definition().name
    }

    /// Run the capability. Parameters have already passed schema validation.
    async fn execute(&self, params: Value, context: &AgentContext) -> Result<Value>;
}

/// Lookup table of registered tools.
pub trait ToolRegistry: Send + Sync {
    /// Add or replace a tool.
    fn register(&self, tool: Arc<dyn Tool>);

    fn get(&self, name: &str) -> Option<Arc<dyn Tool>>;

    fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.get(name).map(|t| t.definition().clone())
    }

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All definitions, sorted by name.
    fn list(&self) -> Vec<ToolDefinition>;
}

/// Payload for the remote execution service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub task_type: String,
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

impl RemoteTask {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Merge the fields of a JSON object into the parameters.
    pub fn with_params(mut self, params: &Value) -> Self {
        if let Some(map) = params.as_object() {
            for (k, v) in map {
                self.parameters.insert(k.clone(), v.clone());
            }
        }
        self
    }
}

/// Execute-and-return-result call into the hosted sandbox backend.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, task: RemoteTask) -> Result<Value>;
}
