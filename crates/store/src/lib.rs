#![deny(unused)]
//! Durable records for the agent runtime.
//!
//! Lock events, sandbox container bookkeeping and the tool-call audit trail
//! all go through one record store. Two backends are provided:
//! - [`InMemoryRecordStore`] for tests and single-process runs
//! - [`SqliteRecordStore`] for a persistent single-file database

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use agent_runtime_core::{
    config::StoreConfig,
    traits::{AuditStore, ContainerStore, LockEventStore},
    Error, Result,
};

pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;

/// One backend viewed through each record trait.
#[derive(Clone)]
pub struct RecordStores {
    pub locks: Arc<dyn LockEventStore>,
    pub containers: Arc<dyn ContainerStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl RecordStores {
    pub fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: LockEventStore + ContainerStore + AuditStore + 'static,
    {
        Self {
            locks: store.clone(),
            containers: store.clone(),
            audit: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(InMemoryRecordStore::new()))
    }
}

/// Open the backend named by `config.backend`.
pub fn open(config: &StoreConfig) -> Result<RecordStores> {
    match config.backend.as_str() {
        "memory" => Ok(RecordStores::in_memory()),
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.sqlite_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| Error::storage(format!("Cannot create {}: {}", parent.display(), e)))?;
                }
            }
            Ok(RecordStores::from_backend(Arc::new(SqliteRecordStore::new(&config.sqlite_path)?)))
        }
        other => Err(Error::storage(format!("Unknown store backend: {}", other))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_core::types::AuditEntry;

    #[tokio::test]
    async fn test_open_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: "sqlite".into(),
            sqlite_path: dir.path().join("nested/runtime.db").display().to_string(),
        };
        let stores = open(&config).unwrap();
        stores.audit.log(AuditEntry::new("plan.update", "t1", "alice")).await.unwrap();
        assert_eq!(stores.audit.query(Default::default()).await.unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_backend() {
        let config = StoreConfig {
            backend: "redis".into(),
            ..StoreConfig::default()
        };
        assert!(open(&config).is_err());
    }
}
