use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::schema::ParamSchema;

// =============================================================================
// Tool Classification
// =============================================================================

/// Capability family a tool belongs to. Permissions are granted per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Shell,
    File,
    Browser,
    Search,
    Webdev,
    Plan,
    Message,
}

impl ToolCategory {
    /// All categories, in declaration order.
    pub const ALL: [ToolCategory; 7] = [
        Self::Shell,
        Self::File,
        Self::Browser,
        Self::Search,
        Self::Webdev,
        Self::Plan,
        Self::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::File => "file",
            Self::Browser => "browser",
            Self::Search => "search",
            Self::Webdev => "webdev",
            Self::Plan => "plan",
            Self::Message => "message",
        }
    }

    /// Category implied by a dotted `category.verb` tool name.
    pub fn from_tool_name(name: &str) -> Option<Self> {
        let prefix = name.split('.').next()?;
        Self::ALL.into_iter().find(|c| c.as_str() == prefix)
    }

    /// Whether tools in this category run inside a pooled sandbox.
    pub fn needs_sandbox(&self) -> bool {
        matches!(self, Self::Shell | Self::File | Self::Browser | Self::Webdev)
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static safety classification of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    #[default]
    Safe,
    Moderate,
    Dangerous,
}

/// Risk level shown to a human when confirmation is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only / informational.
    #[default]
    Low,
    /// Writes data but is reversible.
    Medium,
    /// Executes code, modifies state, or reaches external systems.
    High,
    /// Destructive or irreversible.
    Critical,
}

impl RiskLevel {
    /// Numeric risk score (0-100).
    pub fn score(&self) -> u32 {
        match self {
            Self::Low => 10,
            Self::Medium => 30,
            Self::High => 60,
            Self::Critical => 90,
        }
    }
}

impl From<SafetyLevel> for RiskLevel {
    fn from(level: SafetyLevel) -> Self {
        match level {
            SafetyLevel::Safe => Self::Low,
            SafetyLevel::Moderate => Self::Medium,
            SafetyLevel::Dangerous => Self::High,
        }
    }
}

/// Sliding-window request allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Requests allowed per window.
    pub requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimit {
    pub const fn new(requests: u32, window_ms: u64) -> Self {
        Self { requests, window_ms }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(60, 60_000)
    }
}

// =============================================================================
// Tool Definition
// =============================================================================

/// Tool definition held by the tool registry. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique dotted name, e.g. `shell.exec`.
    pub name: String,

    /// Human-readable description.
    pub description: String,

    pub category: ToolCategory,

    pub safety: SafetyLevel,

    /// Per (tool, user) allowance.
    pub rate_limit: RateLimit,

    /// Whether a human must approve each call.
    pub requires_confirmation: bool,

    /// Declarative parameter validator.
    pub schema: ParamSchema,
}

impl ToolDefinition {
    /// Create a definition with safe defaults and an empty schema.
    pub fn new(name: impl Into<String>, category: ToolCategory) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category,
            safety: SafetyLevel::Safe,
            rate_limit: RateLimit::default(),
            requires_confirmation: false,
            schema: ParamSchema::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_safety(mut self, safety: SafetyLevel) -> Self {
        self.safety = safety;
        self
    }

    pub fn with_rate_limit(mut self, requests: u32, window_ms: u64) -> Self {
        self.rate_limit = RateLimit::new(requests, window_ms);
        self
    }

    pub fn with_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn with_schema(mut self, schema: ParamSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from(self.safety)
    }
}

// =============================================================================
// Tool Result
// =============================================================================

/// Machine-readable failure class of a [`ToolResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    NotFound,
    PermissionDenied,
    RateLimitExceeded,
    UserDenied,
    InvalidParams,
    ValidationFailed,
    Timeout,
    Cancelled,
    ExecutionFailed,
}

impl ToolErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::UserDenied => "USER_DENIED",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::ExecutionFailed => "EXECUTION_FAILED",
        }
    }
}

impl fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one tool execution. Failures are values, never panics or errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    /// Opaque structured output.
    pub output: Option<Value>,

    /// Human-readable failure message.
    pub error: Option<String>,

    pub error_code: Option<ToolErrorCode>,

    /// Whether `output` was cut to fit the output budget.
    pub truncated: bool,

    pub duration_ms: u64,

    pub metadata: Map<String, Value>,
}

impl ToolResult {
    /// Create a successful result.
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            ..Default::default()
        }
    }

    /// Create a failed result.
    pub fn failure(code: ToolErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            error_code: Some(code),
            ..Default::default()
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_tool_name() {
        assert_eq!(ToolCategory::from_tool_name("shell.exec"), Some(ToolCategory::Shell));
        assert_eq!(ToolCategory::from_tool_name("browser.navigate"), Some(ToolCategory::Browser));
        assert_eq!(ToolCategory::from_tool_name("unknown.verb"), None);
    }

    #[test]
    fn test_error_code_serializes_screaming_case() {
        let json = serde_json::to_string(&ToolErrorCode::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_EXCEEDED\"");
    }
}
