//! In-memory record store using DashMap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use agent_runtime_core::{
    traits::{AuditStore, ContainerStore, LockEventStore},
    types::{
        AuditEntry, AuditFilter, ContainerQuery, ContainerRecord, ContainerStatus, ContainerUpdate,
        LockEvent,
    },
    Error, Result,
};

/// Volatile store for tests and single-process deployments.
///
/// Containers live in a concurrent map so a conditional update holds only
/// that record's shard lock. Lock events and audit entries are append-only
/// vectors.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    containers: DashMap<String, ContainerRecord>,
    lock_events: RwLock<Vec<LockEvent>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Drop every record.
    pub async fn clear(&self) {
        self.containers.clear();
        self.lock_events.write().await.clear();
        self.audit.write().await.clear();
    }
}

#[async_trait]
impl LockEventStore for InMemoryRecordStore {
    async fn append_lock_event(&self, event: LockEvent) -> Result<()> {
        self.lock_events.write().await.push(event);
        Ok(())
    }

    async fn lock_events(&self, resource: Option<&str>) -> Result<Vec<LockEvent>> {
        Ok(self
            .lock_events
            .read()
            .await
            .iter()
            .filter(|e| resource.map_or(true, |r| e.resource == r))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ContainerStore for InMemoryRecordStore {
    async fn insert_container(&self, record: ContainerRecord) -> Result<()> {
        if self.containers.contains_key(&record.id) {
            return Err(Error::storage(format!("container {} already exists", record.id)));
        }
        tracing::trace!(id = %record.id, template = %record.template, status = %record.status, "Storing container");
        self.containers.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_container(&self, id: &str) -> Result<Option<ContainerRecord>> {
        Ok(self.containers.get(id).map(|r| r.clone()))
    }

    async fn find_containers(&self, query: &ContainerQuery) -> Result<Vec<ContainerRecord>> {
        let mut found: Vec<ContainerRecord> = self
            .containers
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn update_container_if(
        &self,
        id: &str,
        expected: ContainerStatus,
        update: ContainerUpdate,
    ) -> Result<bool> {
        let Some(mut record) = self.containers.get_mut(id) else {
            return Ok(false);
        };
        if record.status != expected {
            return Ok(false);
        }
        update.apply(&mut record);
        Ok(true)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let before = self.containers.len();
        self.containers.retain(|_, r| !r.is_expired(now));
        Ok(before.saturating_sub(self.containers.len()))
    }
}

#[async_trait]
impl AuditStore for InMemoryRecordStore {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        self.audit.write().await.push(entry);
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let entries = self.audit.read().await;
        let matched = entries.iter().filter(|e| filter.matches(e)).cloned();
        Ok(match filter.limit {
            Some(limit) => matched.take(limit).collect(),
            None => matched.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::container;
    use agent_runtime_core::types::LockAction;
    use chrono::Duration;

    #[tokio::test]
    async fn test_conditional_update_claims_once() {
        let store = InMemoryRecordStore::new();
        let now = Utc::now();
        store.insert_container(container("c1", ContainerStatus::Warm, now)).await.unwrap();

        let claim = ContainerUpdate {
            assigned_at: Some(now),
            task_id: Some("t1".into()),
            ..ContainerUpdate::status(ContainerStatus::Assigned)
        };
        assert!(store.update_container_if("c1", ContainerStatus::Warm, claim.clone()).await.unwrap());
        assert!(!store.update_container_if("c1", ContainerStatus::Warm, claim).await.unwrap());

        let record = store.get_container("c1").await.unwrap().unwrap();
        assert_eq!(record.status, ContainerStatus::Assigned);
        assert_eq!(record.task_id.as_deref(), Some("t1"));
        assert!(!store
            .update_container_if("missing", ContainerStatus::Warm, ContainerUpdate::status(ContainerStatus::Assigned))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_find_is_oldest_first() {
        let store = InMemoryRecordStore::new();
        let now = Utc::now();
        store.insert_container(container("new", ContainerStatus::Warm, now)).await.unwrap();
        store
            .insert_container(container("old", ContainerStatus::Warm, now - Duration::seconds(30)))
            .await
            .unwrap();
        store.insert_container(container("busy", ContainerStatus::Assigned, now)).await.unwrap();

        let warm = store
            .find_containers(&ContainerQuery {
                status: Some(ContainerStatus::Warm),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = warm.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["old", "new"]);
    }

    #[tokio::test]
    async fn test_delete_expired_and_duplicates() {
        let store = InMemoryRecordStore::new();
        let now = Utc::now();
        store.insert_container(container("c1", ContainerStatus::Warm, now)).await.unwrap();
        assert!(store.insert_container(container("c1", ContainerStatus::Warm, now)).await.is_err());

        assert_eq!(store.delete_expired(now).await.unwrap(), 0);
        assert_eq!(store.delete_expired(now + Duration::minutes(11)).await.unwrap(), 1);
        assert_eq!(store.container_count(), 0);
    }

    #[tokio::test]
    async fn test_lock_events_filter_by_resource() {
        let store = InMemoryRecordStore::new();
        store.append_lock_event(LockEvent::new(LockAction::Acquire, "r1", "a")).await.unwrap();
        store.append_lock_event(LockEvent::new(LockAction::Acquire, "r2", "b")).await.unwrap();
        store.append_lock_event(LockEvent::new(LockAction::Release, "r1", "a")).await.unwrap();

        let r1 = store.lock_events(Some("r1")).await.unwrap();
        assert_eq!(r1.len(), 2);
        assert_eq!(r1[1].action, LockAction::Release);
        assert_eq!(store.lock_events(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_audit_query() {
        let store = InMemoryRecordStore::new();
        store.log(AuditEntry::new("shell.exec", "t1", "alice")).await.unwrap();
        store
            .log(AuditEntry::new("file.read", "t2", "bob").with_outcome(false, 12, Some("TIMEOUT".into())))
            .await
            .unwrap();

        let failed = store
            .query(AuditFilter {
                success: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].user_id, "bob");
        assert_eq!(
            store
                .query(AuditFilter {
                    limit: Some(1),
                    ..Default::default()
                })
                .await
                .unwrap()[0]
                .tool_name,
            "shell.exec"
        );
    }
}
