//! Coordination traits: messaging between agents and the seams capabilities
//! use to reach the lock manager and the sandbox pool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::Result;
use crate::types::{ContainerAcquisition, LockAcquisition};

/// Delivery priority of an agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Message delivered to an agent's mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub payload: Value,
    pub priority: MessagePriority,
    /// Discard if not read within this many milliseconds.
    pub ttl_ms: Option<u64>,
}

impl AgentMessage {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            priority: MessagePriority::Normal,
            ttl_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }
}

#[async_trait]
pub trait AgentMessenger: Send + Sync {
    async fn send_to_agent(&self, agent_id: &str, role: &str, message: AgentMessage) -> Result<()>;
}

/// Exclusive named-resource locks.
#[async_trait]
pub trait ResourceLocker: Send + Sync {
    async fn acquire(&self, owner: &str, resource: &str, timeout: Duration) -> LockAcquisition;

    /// Returns `false` when `owner` does not hold `resource`.
    async fn release(&self, owner: &str, resource: &str) -> bool;
}

/// Source of execution sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn acquire_sandbox(
        &self,
        template: &str,
        user_id: &str,
        task_id: &str,
    ) -> Result<ContainerAcquisition>;

    async fn release_sandbox(&self, container_id: &str) -> Result<()>;
}
