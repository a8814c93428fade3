use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_runtime_coordination::{ChannelMessenger, LockManager};
use agent_runtime_core::traits::{LockEventStore, ResourceLocker};
use agent_runtime_core::types::{LockAction, LockRefusal};
use agent_runtime_store::InMemoryRecordStore;

const WAIT: Duration = Duration::from_secs(30);

#[tokio::test(start_paused = true)]
async fn test_crossed_pair_one_side_refused_other_completes() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let manager = Arc::new(LockManager::default().with_store(store.clone()));

    assert!(manager.acquire_lock("coder-1", "repo/main.rs", WAIT).await.acquired);
    assert!(manager.acquire_lock("reviewer-1", "repo/lib.rs", WAIT).await.acquired);

    let coder = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let got = manager.acquire_lock("coder-1", "repo/lib.rs", WAIT).await;
            if got.acquired {
                manager.release_lock("coder-1", "repo/lib.rs").await;
                manager.release_lock("coder-1", "repo/main.rs").await;
            }
            got
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reviewer = manager.acquire_lock("reviewer-1", "repo/main.rs", WAIT).await;
    assert!(!reviewer.acquired);
    assert_eq!(reviewer.refusal, Some(LockRefusal::WouldDeadlock));

    // The refused side backs off, letting the other finish.
    assert!(manager.release_lock("reviewer-1", "repo/lib.rs").await);
    let coder = coder.await?;
    assert!(coder.acquired);
    assert!(manager.wait_for_edges().is_empty());
    assert!(manager.locks_held_by("coder-1").is_empty());

    let acquires = store
        .lock_events(None)
        .await?
        .into_iter()
        .filter(|e| e.action == LockAction::Acquire)
        .count();
    assert_eq!(acquires, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_three_agent_chain_refused_at_closing_edge() {
    let manager = Arc::new(LockManager::default());
    for (agent, resource) in [("a", "r1"), ("b", "r2"), ("c", "r3")] {
        assert!(manager.acquire_lock(agent, resource, WAIT).await.acquired);
    }

    let mut waiters = Vec::new();
    for (agent, resource) in [("a", "r2"), ("b", "r3")] {
        let manager = manager.clone();
        waiters.push(tokio::spawn(async move {
            manager.acquire_lock(agent, resource, Duration::from_secs(2)).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.wait_for_edges().len(), 2);

    let closing = manager.acquire_lock("c", "r1", WAIT).await;
    assert_eq!(closing.refusal, Some(LockRefusal::WouldDeadlock));
    assert_eq!(closing.holder.as_deref(), Some("a"));
    assert!(manager.find_all_cycles().is_empty());

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap().refusal, Some(LockRefusal::Timeout));
    }
    assert!(manager.wait_for_edges().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_force_release_preempts_pending_wait() {
    let messenger = Arc::new(ChannelMessenger::new());
    messenger.register("writer-1");
    let manager = Arc::new(LockManager::default().with_messenger(messenger.clone()));
    assert!(manager.acquire_lock("planner-1", "plan.md", WAIT).await.acquired);
    assert!(manager.acquire_lock("writer-1", "notes.md", WAIT).await.acquired);

    let writer = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire_lock("writer-1", "plan.md", WAIT).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let cycle = vec!["planner-1".to_string(), "writer-1".to_string()];
    assert_eq!(manager.resolve_deadlock(&cycle).await.as_deref(), Some("writer-1"));
    assert!(manager.lock_status("notes.md").is_none());

    let outcome = writer.await.unwrap();
    assert_eq!(outcome.refusal, Some(LockRefusal::Preempted));

    let inbox = messenger.receive("writer-1").unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].1.payload["action"], "preempted");
}

#[tokio::test(start_paused = true)]
async fn test_contending_tasks_never_overlap() {
    let manager = Arc::new(LockManager::default());
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let locker: Arc<dyn ResourceLocker> = manager.clone();
        let inside = inside.clone();
        let overlaps = overlaps.clone();
        tasks.push(tokio::spawn(async move {
            let owner = format!("executor-{}", i);
            let got = locker.acquire(&owner, "shared.db", Duration::from_secs(120)).await;
            assert!(got.acquired);
            if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(700)).await;
            inside.fetch_sub(1, Ordering::SeqCst);
            assert!(locker.release(&owner, "shared.db").await);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(manager.lock_status("shared.db").is_none());
}
