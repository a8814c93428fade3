//! Error types for the agent runtime.

use thiserror::Error;

/// Result type alias using the runtime's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the agent runtime.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Skills Errors
    // =========================================================================
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Remote execution error: {0}")]
    RemoteExecution(String),

    // =========================================================================
    // Governance Errors
    // =========================================================================
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Governance error: {0}")]
    Governance(String),

    // =========================================================================
    // Coordination Errors
    // =========================================================================
    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a tool not found error.
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    /// Create a tool execution error.
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create a remote execution error.
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::RemoteExecution(msg.into())
    }

    /// Create a governance error.
    pub fn governance(msg: impl Into<String>) -> Self {
        Self::Governance(msg.into())
    }

    /// Create a lock error.
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    /// Create a messaging error.
    pub fn messaging(msg: impl Into<String>) -> Self {
        Self::Messaging(msg.into())
    }

    /// Create a sandbox error.
    pub fn sandbox(msg: impl Into<String>) -> Self {
        Self::Sandbox(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
