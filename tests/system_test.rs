//! End-to-end scenarios through [`AgentRuntime`].

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use agent_runtime::AgentRuntime;
use agent_runtime_core::config::AppConfig;
use agent_runtime_core::mocks::{MockRemoteExecutor, StaticConfirmation};
use agent_runtime_core::traits::ContainerStore;
use agent_runtime_core::types::{
    codes, AgentContext, AgentPlan, ContainerStatus, LockRefusal, PlanStep, ToolErrorCode,
};
use agent_runtime_store::RecordStores;

fn runtime() -> (AgentRuntime, Arc<MockRemoteExecutor>) {
    let remote = Arc::new(MockRemoteExecutor::new());
    let runtime = AgentRuntime::with_stores(AppConfig::default(), RecordStores::in_memory(), remote.clone());
    (runtime, remote)
}

fn context(task: &str, agent: &str) -> AgentContext {
    AgentContext::new(task, "alice")
        .with_agent(agent)
        .with_workspace("/workspace")
        .with_all_permissions()
        .with_confirmation(Arc::new(StaticConfirmation::approve()))
}

#[tokio::test]
async fn test_plan_over_step_limit_is_rejected() {
    let (runtime, _) = runtime();
    let plan = (0..51).fold(AgentPlan::new("big"), |plan, i| {
        plan.with_step(PlanStep::new(
            format!("s{}", i),
            "file.read",
            json!({ "path": format!("f{}.txt", i) }),
        ))
    });

    let result = runtime.validate_plan(&plan);
    assert!(!result.valid);
    assert!(result.has_error(codes::TOO_MANY_STEPS));

    let fifty = AgentPlan {
        steps: plan.steps[..50].to_vec(),
        ..plan
    };
    assert!(!runtime.validate_plan(&fifty).has_error(codes::TOO_MANY_STEPS));
}

#[tokio::test(start_paused = true)]
async fn test_eleventh_shell_call_in_a_minute_is_rate_limited() {
    let (runtime, remote) = runtime();
    runtime.pool().replenish_once().await.unwrap();
    let ctx = context("task-1", "coder-1");

    for i in 0..10 {
        let result = runtime
            .execute("shell.exec", json!({ "command": format!("echo {}", i) }), &ctx)
            .await;
        assert!(result.success, "call {} failed: {:?}", i, result.error);
    }
    let eleventh = runtime.execute("shell.exec", json!({"command": "echo 10"}), &ctx).await;
    assert_eq!(eleventh.error_code, Some(ToolErrorCode::RateLimitExceeded));
    assert_eq!(remote.tasks().len(), 10);

    // All ten calls shared the task's one sandbox.
    assert_eq!(runtime.sandboxes().held_by("task-1").len(), 1);

    tokio::time::advance(Duration::from_millis(60_001)).await;
    let after = runtime.execute("shell.exec", json!({"command": "echo 11"}), &ctx).await;
    assert!(after.success);
}

#[tokio::test(start_paused = true)]
async fn test_crossed_resource_acquisition_is_refused() {
    let (runtime, _) = runtime();
    runtime.register_agent("coder-a", "coder");
    runtime.register_agent("coder-b", "coder");
    let locks = runtime.locks().clone();

    assert!(locks.acquire_lock("coder-a", "R1", Duration::from_secs(1)).await.acquired);
    assert!(locks.acquire_lock("coder-b", "R2", Duration::from_secs(1)).await.acquired);

    let waiter = {
        let locks = locks.clone();
        tokio::spawn(async move { locks.acquire_lock("coder-a", "R2", Duration::from_secs(30)).await })
    };
    tokio::task::yield_now().await;

    let crossed = locks.acquire_lock("coder-b", "R1", Duration::from_secs(30)).await;
    assert!(!crossed.acquired);
    assert_eq!(crossed.refusal, Some(LockRefusal::WouldDeadlock));
    assert_eq!(crossed.holder.as_deref(), Some("coder-a"));

    assert!(locks.release_lock("coder-b", "R2").await);
    let granted = waiter.await.unwrap();
    assert!(granted.acquired);
    assert_eq!(locks.lock_status("R2").unwrap().holder, "coder-a");
}

#[tokio::test]
async fn test_finish_task_releases_everything() {
    let (runtime, _) = runtime();
    runtime.pool().replenish_once().await.unwrap();
    let ctx = context("task-9", "writer-9");

    let result = runtime
        .execute("browser.navigate", json!({"url": "https://example.com"}), &ctx)
        .await;
    assert!(result.success, "{:?}", result.error);
    assert!(runtime
        .locks()
        .acquire_lock("writer-9", "doc:report", Duration::from_secs(1))
        .await
        .acquired);
    let held = runtime.sandboxes().held_by("task-9");
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].template, "browser");
    assert_eq!(runtime.pipeline().active_tasks("alice"), 1);

    runtime.finish_task(&ctx).await;

    assert_eq!(runtime.pipeline().active_tasks("alice"), 0);
    assert!(runtime.sandboxes().held_by("task-9").is_empty());
    assert!(runtime.locks().locks_held_by("writer-9").is_empty());
    let record = runtime.stores().containers.get_container(&held[0].id).await.unwrap().unwrap();
    assert_eq!(record.status, ContainerStatus::Expired);
}
