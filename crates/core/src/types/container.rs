use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Warm Container Types
// =============================================================================

/// Lifecycle of a pooled sandbox. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Warming,
    Warm,
    Assigned,
    Expired,
    Terminated,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warming => "warming",
            Self::Warm => "warm",
            Self::Assigned => "assigned",
            Self::Expired => "expired",
            Self::Terminated => "terminated",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "warming" => Some(Self::Warming),
            "warm" => Some(Self::Warm),
            "assigned" => Some(Self::Assigned),
            "expired" => Some(Self::Expired),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// One-way progression; an assigned container never returns to warm.
    pub fn can_transition_to(&self, next: ContainerStatus) -> bool {
        next > *self
    }

    /// Whether the container still occupies pool capacity.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Warming | Self::Warm | Self::Assigned)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable bookkeeping record for one sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub template: String,
    pub region: String,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub user_id: Option<String>,
    pub task_id: Option<String>,
    /// Created ahead of demand by the replenishment loop.
    pub pre_initialized: bool,
}

impl ContainerRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Filter for container lookups. Results are ordered oldest first.
#[derive(Debug, Clone, Default)]
pub struct ContainerQuery {
    pub region: Option<String>,
    pub template: Option<String>,
    pub status: Option<ContainerStatus>,
    pub limit: Option<usize>,
}

impl ContainerQuery {
    pub fn matches(&self, record: &ContainerRecord) -> bool {
        self.region.as_ref().map_or(true, |r| &record.region == r)
            && self.template.as_ref().map_or(true, |t| &record.template == t)
            && self.status.map_or(true, |s| record.status == s)
    }
}

/// Fields written by a conditional container update. `None` leaves a field as is.
#[derive(Debug, Clone)]
pub struct ContainerUpdate {
    pub status: ContainerStatus,
    pub assigned_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub task_id: Option<String>,
}

impl ContainerUpdate {
    pub fn status(status: ContainerStatus) -> Self {
        Self {
            status,
            assigned_at: None,
            released_at: None,
            user_id: None,
            task_id: None,
        }
    }

    pub fn apply(&self, record: &mut ContainerRecord) {
        record.status = self.status;
        if let Some(at) = self.assigned_at {
            record.assigned_at = Some(at);
        }
        if let Some(at) = self.released_at {
            record.released_at = Some(at);
        }
        if let Some(ref user) = self.user_id {
            record.user_id = Some(user.clone());
        }
        if let Some(ref task) = self.task_id {
            record.task_id = Some(task.clone());
        }
    }
}

/// Result of asking the pool for a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerAcquisition {
    pub container: ContainerRecord,
    pub was_warm: bool,
    pub latency_ms: u64,
    /// Why the warm path was not taken.
    pub fallback_reason: Option<String>,
}
