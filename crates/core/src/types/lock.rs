use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Lock Types
// =============================================================================

/// Current holder of a named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub resource: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    /// Lease end; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// `waiting` is blocked on `resource`, currently held by `waiting_for`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaitForEdge {
    pub waiting: String,
    pub waiting_for: String,
    pub resource: String,
    pub since: DateTime<Utc>,
}

/// Kind of a durable lock event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockAction {
    Acquire,
    Release,
    ForceRelease,
    Expire,
}

impl LockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Release => "release",
            Self::ForceRelease => "force_release",
            Self::Expire => "expire",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "acquire" => Some(Self::Acquire),
            "release" => Some(Self::Release),
            "force_release" => Some(Self::ForceRelease),
            "expire" => Some(Self::Expire),
            _ => None,
        }
    }
}

/// Append-only record of a lock state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEvent {
    pub action: LockAction,
    pub resource: String,
    pub holder: String,
    pub at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LockEvent {
    pub fn new(action: LockAction, resource: impl Into<String>, holder: impl Into<String>) -> Self {
        Self {
            action,
            resource: resource.into(),
            holder: holder.into(),
            at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }
}

/// Why a lock was not granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockRefusal {
    /// Waiting would have closed a wait-for cycle.
    WouldDeadlock,
    Timeout,
    Cancelled,
    /// The waiter was chosen as a deadlock victim while waiting.
    Preempted,
}

/// Outcome of a lock request. Refusals are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockAcquisition {
    pub acquired: bool,
    /// Holder at the time of refusal.
    pub holder: Option<String>,
    pub refusal: Option<LockRefusal>,
    pub waited_ms: u64,
}

impl LockAcquisition {
    pub fn granted(waited_ms: u64) -> Self {
        Self {
            acquired: true,
            holder: None,
            refusal: None,
            waited_ms,
        }
    }

    pub fn refused(refusal: LockRefusal, holder: Option<String>, waited_ms: u64) -> Self {
        Self {
            acquired: false,
            holder,
            refusal: Some(refusal),
            waited_ms,
        }
    }
}
