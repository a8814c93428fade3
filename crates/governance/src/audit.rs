//! Audit trail for executed tool calls.

use std::sync::Arc;
use tokio::sync::mpsc;

use agent_runtime_core::{traits::AuditStore, types::AuditEntry};

/// Non-blocking front for an [`AuditStore`].
///
/// Entries go through a bounded queue drained by a background task, so a
/// slow store never delays a tool result. When the queue is full the entry
/// is dropped and counted.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditSink {
    /// Spawn the drain task. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn AuditStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEntry>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = store.log(entry).await {
                    tracing::error!(error = %e, "Failed to persist audit entry");
                }
            }
        });
        Self { tx }
    }

    /// Queue an entry. Never waits.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.tx.try_send(entry) {
            let entry = match e {
                mpsc::error::TrySendError::Full(entry) | mpsc::error::TrySendError::Closed(entry) => entry,
            };
            metrics::counter!("audit_entries_dropped_total").increment(1);
            tracing::warn!(
                tool = %entry.tool_name,
                task_id = %entry.task_id,
                "Audit queue unavailable, entry dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_core::types::AuditFilter;
    use agent_runtime_store::InMemoryRecordStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sink_drains_into_store() {
        let store = Arc::new(InMemoryRecordStore::new());
        let sink = AuditSink::spawn(store.clone(), 8);
        sink.record(AuditEntry::new("search.web", "t1", "alice"));
        sink.record(AuditEntry::new("search.web", "t2", "alice"));

        let mut logged = Vec::new();
        for _ in 0..50 {
            logged = store.query(AuditFilter::default()).await.unwrap();
            if logged.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].task_id, "t1");
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let store = Arc::new(InMemoryRecordStore::new());
        let sink = AuditSink::spawn(store, 1);
        // The drain task has not run yet on this single-threaded runtime.
        for i in 0..10 {
            sink.record(AuditEntry::new("plan.update", format!("t{}", i), "alice"));
        }
    }
}
