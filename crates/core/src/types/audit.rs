use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Audit Types
// =============================================================================

/// One executed tool call, as written to the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub task_id: String,
    pub user_id: String,
    pub success: bool,
    pub duration_ms: u64,
    /// `ToolErrorCode` of a failed call.
    pub error_code: Option<String>,
}

impl AuditEntry {
    pub fn new(
        tool_name: impl Into<String>,
        task_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            tool_name: tool_name.into(),
            task_id: task_id.into(),
            user_id: user_id.into(),
            success: true,
            duration_ms: 0,
            error_code: None,
        }
    }

    pub fn with_outcome(mut self, success: bool, duration_ms: u64, error_code: Option<String>) -> Self {
        self.success = success;
        self.duration_ms = duration_ms;
        self.error_code = error_code;
        self
    }
}

/// Filter for querying the audit trail. Results are oldest first.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub task_id: Option<String>,
    pub tool_name: Option<String>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.user_id.as_ref().map_or(true, |u| &entry.user_id == u)
            && self.task_id.as_ref().map_or(true, |t| &entry.task_id == t)
            && self.tool_name.as_ref().map_or(true, |n| &entry.tool_name == n)
            && self.success.map_or(true, |s| entry.success == s)
    }
}
