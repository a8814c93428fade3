use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Structured runtime event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: String,
    /// Task the event belongs to, if any
    pub task_id: Option<String>,
    /// Agent, user, or 'system'
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: EventSeverity,
    /// Event-specific data
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: None,
            actor: "system".to_string(),
            timestamp: Utc::now(),
            event_type,
            severity: EventSeverity::Info,
            payload,
        }
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Tool execution started
    ToolExecStarted,
    /// Tool execution finished (either outcome)
    ToolExecFinished,
    /// A safety layer blocked a call
    ValidationFailed,
    /// Lock granted
    LockAcquired,
    /// Lock released by its holder
    LockReleased,
    /// Lock request refused because waiting would close a cycle
    DeadlockPrevented,
    /// Victim chosen and stripped of its locks
    DeadlockResolved,
    /// Lease passed its TTL and was swept
    LockExpired,
    /// Warm container claimed
    SandboxWarmHit,
    /// No warm container; one created on demand
    SandboxColdStart,
    /// Container handed back and retired
    SandboxReleased,
    /// Replenishment tick created containers
    PoolReplenished,
    /// Cleanup tick removed expired containers
    PoolCleaned,
    /// System error or exception
    SystemError,
    Other(String),
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(name) => f.write_str(name),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

// Helper structs for common payloads

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolExecPayload {
    pub tool_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockPayload {
    pub resource: String,
    pub holder: Option<String>,
    pub waited_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SandboxPayload {
    pub container_id: String,
    pub template: String,
    pub region: String,
    pub latency_ms: Option<u64>,
    pub reason: Option<String>,
}
