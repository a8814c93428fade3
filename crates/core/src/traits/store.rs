//! Durable record store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    AuditEntry, AuditFilter, ContainerQuery, ContainerRecord, ContainerStatus, ContainerUpdate,
    LockEvent,
};

/// Append-only log of lock state changes.
#[async_trait]
pub trait LockEventStore: Send + Sync {
    async fn append_lock_event(&self, event: LockEvent) -> Result<()>;

    /// Events in append order, optionally for one resource.
    async fn lock_events(&self, resource: Option<&str>) -> Result<Vec<LockEvent>>;
}

/// Container bookkeeping with a compare-and-set update.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    async fn insert_container(&self, record: ContainerRecord) -> Result<()>;

    async fn get_container(&self, id: &str) -> Result<Option<ContainerRecord>>;

    /// Matching records, oldest `created_at` first.
    async fn find_containers(&self, query: &ContainerQuery) -> Result<Vec<ContainerRecord>>;

    /// Apply `update` only if the record is currently in `expected` status.
    /// Returns whether the update landed.
    async fn update_container_if(
        &self,
        id: &str,
        expected: ContainerStatus,
        update: ContainerUpdate,
    ) -> Result<bool>;

    /// Remove every record whose `expires_at` is at or before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Persistence for the tool-call audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn log(&self, entry: AuditEntry) -> Result<()>;

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>>;
}
