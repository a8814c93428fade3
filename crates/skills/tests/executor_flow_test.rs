//! Executor wired to the real lock manager, warm pool, safety pipeline and
//! audit store. Only the hosted backend is mocked.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use agent_runtime_coordination::LockManager;
use agent_runtime_core::config::{ExecutorConfig, PoolSettings, SafetyConfig};
use agent_runtime_core::mocks::{MockRemoteExecutor, StaticConfirmation};
use agent_runtime_core::traits::{
    AuditStore, ContainerStore, LockEventStore, RemoteExecutor, RemoteTask, ToolRegistry,
};
use agent_runtime_core::types::{AgentContext, AuditFilter, ContainerStatus, LockAction, ToolErrorCode};
use agent_runtime_governance::{AuditSink, SafetyPipeline};
use agent_runtime_sandbox::WarmPoolManager;
use agent_runtime_skills::{
    register_builtin_tools, BuiltinServices, DefaultToolRegistry, ExecuteOptions, TaskSandboxes,
    ToolExecutor,
};
use agent_runtime_store::InMemoryRecordStore;

/// Backend that takes `delay` to answer every task.
struct SlowBackend {
    delay: Duration,
}

#[async_trait]
impl RemoteExecutor for SlowBackend {
    async fn execute(&self, task: RemoteTask) -> agent_runtime_core::Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "task_type": task.task_type, "ok": true }))
    }
}

struct Harness<R = MockRemoteExecutor> {
    executor: ToolExecutor,
    store: Arc<InMemoryRecordStore>,
    locks: Arc<LockManager>,
    pool: Arc<WarmPoolManager>,
    sandboxes: Arc<TaskSandboxes>,
    remote: Arc<R>,
}

async fn harness() -> anyhow::Result<Harness> {
    harness_on(Arc::new(MockRemoteExecutor::new())).await
}

async fn harness_on<R: RemoteExecutor + 'static>(remote: Arc<R>) -> anyhow::Result<Harness<R>> {
    let store = Arc::new(InMemoryRecordStore::new());
    let locks = Arc::new(LockManager::default().with_store(store.clone()));
    let pool = Arc::new(WarmPoolManager::new(PoolSettings::default(), store.clone()));
    pool.replenish_once().await?;
    let sandboxes = Arc::new(TaskSandboxes::new(pool.clone()));

    let registry: Arc<dyn ToolRegistry> = Arc::new(DefaultToolRegistry::new());
    register_builtin_tools(
        registry.as_ref(),
        &BuiltinServices {
            remote: remote.clone(),
            sandboxes: sandboxes.clone(),
            locker: locks.clone(),
            lock_timeout: Duration::from_secs(5),
        },
    );
    let pipeline = Arc::new(SafetyPipeline::new(SafetyConfig::default(), Some(registry.clone())));
    let executor = ToolExecutor::new(registry, ExecutorConfig::default())
        .with_pipeline(pipeline)
        .with_audit(AuditSink::spawn(store.clone(), 64));

    Ok(Harness {
        executor,
        store,
        locks,
        pool,
        sandboxes,
        remote,
    })
}

fn ctx() -> AgentContext {
    AgentContext::new("task-1", "alice")
        .with_agent("coder-1")
        .with_workspace("/workspace")
        .with_all_permissions()
        .with_confirmation(Arc::new(StaticConfirmation::approve()))
}

#[tokio::test]
async fn test_file_write_runs_in_warm_sandbox_under_lock() -> anyhow::Result<()> {
    let h = harness().await?;
    let result = h
        .executor
        .execute(
            "file.write",
            json!({"path": "notes.txt", "content": "hello"}),
            &ctx(),
            Default::default(),
        )
        .await;
    assert!(result.success, "{:?}", result.error);
    let echo = &result.output.unwrap()["echo"];
    assert_eq!(echo["container"]["template"], "base");
    assert_eq!(echo["task_id"], "task-1");

    assert!(h.locks.lock_status("file:notes.txt").is_none());
    let actions: Vec<_> = h
        .store
        .lock_events(Some("file:notes.txt"))
        .await?
        .into_iter()
        .map(|e| (e.action, e.holder))
        .collect();
    assert_eq!(
        actions,
        [
            (LockAction::Acquire, "coder-1".to_string()),
            (LockAction::Release, "coder-1".to_string())
        ]
    );
    assert_eq!(h.pool.stats().await?.warm_hits, 1);

    let mut audit = Vec::new();
    for _ in 0..50 {
        audit = h.store.query(AuditFilter::default()).await?;
        if !audit.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].tool_name, "file.write");
    assert!(audit[0].success);
    Ok(())
}

#[tokio::test]
async fn test_output_secrets_are_masked() -> anyhow::Result<()> {
    let h = harness().await?;
    let result = h
        .executor
        .execute(
            "file.write",
            json!({"path": "env.txt", "content": "api_key=abcdef0123456789"}),
            &ctx(),
            Default::default(),
        )
        .await;
    assert!(result.success);
    let output = result.output.unwrap().to_string();
    assert!(!output.contains("abcdef0123456789"));
    assert!(output.contains("[REDACTED_SECRET]"));
    Ok(())
}

#[tokio::test]
async fn test_malware_in_output_fails_the_call() -> anyhow::Result<()> {
    let h = harness().await?;
    let result = h
        .executor
        .execute(
            "file.write",
            json!({"path": "payload.b64", "content": "TVqQAAMAAAAEAAAA//8AALgAAAAAAAAAQAAAAA"}),
            &ctx(),
            Default::default(),
        )
        .await;
    assert!(!result.success);
    assert_eq!(result.error_code, Some(ToolErrorCode::ValidationFailed));
    assert!(result.output.is_none());
    Ok(())
}

#[tokio::test]
async fn test_blocked_command_never_reaches_backend() -> anyhow::Result<()> {
    let h = harness().await?;
    let result = h
        .executor
        .execute("shell.exec", json!({"command": "rm -rf / "}), &ctx(), Default::default())
        .await;
    assert_eq!(result.error_code, Some(ToolErrorCode::ValidationFailed));
    assert!(result.metadata["validation_errors"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c == "BLOCKED_COMMAND"));
    assert!(h.remote.tasks().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_task_sandbox_released_as_expired() -> anyhow::Result<()> {
    let h = harness().await?;
    let ctx = ctx();
    for path in ["a.txt", "b.txt"] {
        let r = h
            .executor
            .execute("file.read", json!({ "path": path }), &ctx, Default::default())
            .await;
        assert!(r.success);
    }
    let held = h.sandboxes.held_by("task-1");
    assert_eq!(held.len(), 1);

    assert_eq!(h.sandboxes.release_task_sandbox("task-1").await, 1);
    let record = h.store.get_container(&held[0].id).await?.unwrap();
    assert_eq!(record.status, ContainerStatus::Expired);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_write_still_releases_its_lock() -> anyhow::Result<()> {
    let h = harness_on(Arc::new(SlowBackend {
        delay: Duration::from_secs(2),
    }))
    .await?;
    let params = json!({"path": "a.txt", "content": "first"});

    let timed_out = h
        .executor
        .execute(
            "file.write",
            params,
            &ctx(),
            ExecuteOptions::default().with_timeout(Duration::from_millis(100)),
        )
        .await;
    assert_eq!(timed_out.error_code, Some(ToolErrorCode::Timeout));
    // The abandoned call is still running and still owns the path.
    assert_eq!(h.locks.lock_status("file:a.txt").unwrap().holder, "coder-1");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.locks.lock_status("file:a.txt").is_none());

    let other = AgentContext::new("task-2", "bob")
        .with_agent("coder-2")
        .with_all_permissions();
    let second = h
        .executor
        .execute(
            "file.write",
            json!({"path": "a.txt", "content": "second"}),
            &other,
            Default::default(),
        )
        .await;
    assert!(second.success, "{:?}", second.error);
    assert!(h.locks.lock_status("file:a.txt").is_none());
    Ok(())
}
