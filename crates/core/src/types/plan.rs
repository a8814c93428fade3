use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use super::tool::ToolCategory;

// =============================================================================
// Agent Plan Types
// =============================================================================

/// Retry behaviour of a single plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

/// One proposed tool call inside an [`AgentPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub params: Value,
    /// Ids of steps that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            params,
            depends_on: Vec::new(),
            retry: None,
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.retry = Some(RetryPolicy {
            max_attempts,
            backoff_ms,
        });
        self
    }
}

/// A DAG of proposed tool calls, validated before any step runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPlan {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    /// Categories the plan declares it needs.
    #[serde(default)]
    pub required_permissions: HashSet<ToolCategory>,
}

impl AgentPlan {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_permissions(mut self, categories: impl IntoIterator<Item = ToolCategory>) -> Self {
        self.required_permissions.extend(categories);
        self
    }
}
