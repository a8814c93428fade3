use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::tool::{RiskLevel, ToolCategory};
use crate::traits::ConfirmationHandler;

// =============================================================================
// Agent Context
// =============================================================================

/// Per-invocation identity and capability set. Read-only during a tool call.
#[derive(Clone)]
pub struct AgentContext {
    pub task_id: String,
    pub user_id: String,
    /// Lock owner identity; falls back to `task_id`.
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub workspace_path: Option<String>,
    pub browser_session_id: Option<String>,
    /// Categories this task may invoke.
    pub permissions: HashSet<ToolCategory>,
    pub confirmation: Option<Arc<dyn ConfirmationHandler>>,
}

impl AgentContext {
    /// Create a context with no permissions.
    pub fn new(task_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            agent_id: None,
            session_id: None,
            workspace_path: None,
            browser_session_id: None,
            permissions: HashSet::new(),
            confirmation: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_workspace(mut self, path: impl Into<String>) -> Self {
        self.workspace_path = Some(path.into());
        self
    }

    pub fn with_browser_session(mut self, id: impl Into<String>) -> Self {
        self.browser_session_id = Some(id.into());
        self
    }

    pub fn with_permissions(mut self, categories: impl IntoIterator<Item = ToolCategory>) -> Self {
        self.permissions.extend(categories);
        self
    }

    /// Grant every category.
    pub fn with_all_permissions(self) -> Self {
        self.with_permissions(ToolCategory::ALL)
    }

    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    pub fn allows(&self, category: ToolCategory) -> bool {
        self.permissions.contains(&category)
    }

    /// Identity used for lock ownership.
    pub fn lock_owner(&self) -> &str {
        self.agent_id.as_deref().unwrap_or(&self.task_id)
    }
}

impl fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentContext")
            .field("task_id", &self.task_id)
            .field("user_id", &self.user_id)
            .field("agent_id", &self.agent_id)
            .field("session_id", &self.session_id)
            .field("workspace_path", &self.workspace_path)
            .field("browser_session_id", &self.browser_session_id)
            .field("permissions", &self.permissions)
            .field("confirmation", &self.confirmation.is_some())
            .finish()
    }
}

// =============================================================================
// Confirmation Types
// =============================================================================

/// Prompt shown to a human before a confirmation-gated tool runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub request_id: String,
    pub task_id: String,
    pub user_id: String,
    pub tool_name: String,
    pub params: Value,
    pub risk_level: RiskLevel,
    /// Per-request override of the handler's timeout.
    pub timeout_secs: Option<u64>,
}

impl ConfirmationRequest {
    pub fn new(
        context: &AgentContext,
        tool_name: impl Into<String>,
        params: Value,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            task_id: context.task_id.clone(),
            user_id: context.user_id.clone(),
            tool_name: tool_name.into(),
            params,
            risk_level,
            timeout_secs: None,
        }
    }
}

/// Human's answer to a [`ConfirmationRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ConfirmationResponse {
    Approved {
        reason: Option<String>,
        /// Audit reason code, e.g. "USER_APPROVED", "AUTO_APPROVED".
        reason_code: String,
    },
    Denied {
        reason: String,
        /// Audit reason code, e.g. "USER_DENIED", "TIMEOUT".
        reason_code: String,
    },
}

impl ConfirmationResponse {
    pub fn approved(reason_code: impl Into<String>) -> Self {
        Self::Approved {
            reason: None,
            reason_code: reason_code.into(),
        }
    }

    pub fn denied(reason: impl Into<String>, reason_code: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
            reason_code: reason_code.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }
}
