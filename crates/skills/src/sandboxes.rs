//! Per-task sandbox leases.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use agent_runtime_core::{
    traits::SandboxProvider,
    types::{ContainerRecord, ToolCategory},
    Error, Result,
};

/// Pool template a sandboxed category runs in.
pub fn template_for(category: ToolCategory) -> &'static str {
    match category {
        ToolCategory::Browser => "browser",
        ToolCategory::Webdev => "node",
        _ => "base",
    }
}

type Slot = Arc<OnceCell<ContainerRecord>>;

/// Holds at most one container per (task, template) for the task's lifetime.
///
/// Each (task, template) pair has its own slot, so only callers asking for
/// the same slot wait on each other's acquisition.
pub struct TaskSandboxes {
    provider: Arc<dyn SandboxProvider>,
    leases: DashMap<(String, String), Slot>,
}

impl TaskSandboxes {
    pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
        Self {
            provider,
            leases: DashMap::new(),
        }
    }

    /// The task's container for `template`, acquired on first use.
    pub async fn container_for(&self, task_id: &str, user_id: &str, template: &str) -> Result<ContainerRecord> {
        let key = (task_id.to_string(), template.to_string());
        let slot: Slot = self.leases.entry(key.clone()).or_default().value().clone();

        let container = slot
            .get_or_try_init(|| async {
                let acquisition = self.provider.acquire_sandbox(template, user_id, task_id).await?;
                tracing::debug!(
                    task_id,
                    template,
                    container_id = %acquisition.container.id,
                    warm = acquisition.was_warm,
                    "Leased sandbox for task"
                );
                Ok::<_, Error>(acquisition.container)
            })
            .await?
            .clone();

        // The task finished while its container was starting.
        let still_leased = self
            .leases
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current.value(), &slot));
        if !still_leased {
            self.release_container(task_id, &container).await;
            return Err(Error::sandbox(format!("task {} finished before its sandbox was ready", task_id)));
        }
        Ok(container)
    }

    /// Return every container the task holds. Returns how many were released.
    pub async fn release_task_sandbox(&self, task_id: &str) -> usize {
        let keys: Vec<_> = self
            .leases
            .iter()
            .filter(|entry| entry.key().0 == task_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut released = 0;
        for key in keys {
            let Some((_, slot)) = self.leases.remove(&key) else {
                continue;
            };
            // An empty slot is still starting; container_for returns it itself.
            if let Some(container) = slot.get() {
                if self.release_container(task_id, container).await {
                    released += 1;
                }
            }
        }
        released
    }

    async fn release_container(&self, task_id: &str, container: &ContainerRecord) -> bool {
        match self.provider.release_sandbox(&container.id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(task_id, container_id = %container.id, error = %e, "Failed to release sandbox");
                false
            }
        }
    }

    /// Containers the task holds, ordered by template.
    pub fn held_by(&self, task_id: &str) -> Vec<ContainerRecord> {
        let mut held: Vec<ContainerRecord> = self
            .leases
            .iter()
            .filter(|entry| entry.key().0 == task_id)
            .filter_map(|entry| entry.value().get().cloned())
            .collect();
        held.sort_by(|a, b| a.template.cmp(&b.template));
        held
    }
}
