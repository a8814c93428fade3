#![deny(unused)]
//! Agent execution and resource coordination runtime.
//!
//! [`AgentRuntime`] owns one instance of every component and wires them
//! together:
//!
//! ```text
//!  plan step ──► SafetyPipeline (L1-L3) ──► ToolExecutor ──► Tool
//!                                                │            │
//!                                                │            ├─► LockManager
//!                                                │            └─► WarmPoolManager
//!                                                ▼
//!                                     SafetyPipeline (L4) ──► caller
//! ```

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agent_runtime_coordination::{ChannelMessenger, LockManager, LockSweeper};
use agent_runtime_core::{
    config::AppConfig,
    traits::{EventEmitter, RemoteExecutor, ToolRegistry, TracingEventEmitter},
    types::{AgentContext, AgentPlan, ToolResult, ValidationResult},
    Result,
};
use agent_runtime_governance::{AuditSink, SafetyPipeline};
use agent_runtime_sandbox::{PoolScheduler, WarmPoolManager};
use agent_runtime_skills::{
    register_builtin_tools, BuiltinServices, DefaultToolRegistry, ExecuteOptions, TaskSandboxes,
    ToolExecutor,
};
use agent_runtime_store::RecordStores;

/// Process-wide runtime context.
pub struct AgentRuntime {
    config: AppConfig,
    stores: RecordStores,
    pipeline: Arc<SafetyPipeline>,
    executor: ToolExecutor,
    locks: Arc<LockManager>,
    messenger: Arc<ChannelMessenger>,
    pool: Arc<WarmPoolManager>,
    sandboxes: Arc<TaskSandboxes>,
}

impl AgentRuntime {
    /// Build the runtime on the store backend named in `config.store`.
    ///
    /// Must be called inside a tokio runtime; the audit writer is spawned here.
    pub fn new(config: AppConfig, remote: Arc<dyn RemoteExecutor>) -> Result<Self> {
        let stores = agent_runtime_store::open(&config.store)?;
        Ok(Self::with_stores(config, stores, remote))
    }

    pub fn with_stores(config: AppConfig, stores: RecordStores, remote: Arc<dyn RemoteExecutor>) -> Self {
        let events: Arc<dyn EventEmitter> = Arc::new(TracingEventEmitter);

        let messenger = Arc::new(ChannelMessenger::new());
        let locks = Arc::new(
            LockManager::new(config.locks.clone())
                .with_store(stores.locks.clone())
                .with_messenger(messenger.clone())
                .with_events(events.clone()),
        );
        let pool = Arc::new(
            WarmPoolManager::new(config.pool.clone(), stores.containers.clone()).with_events(events.clone()),
        );
        let sandboxes = Arc::new(TaskSandboxes::new(pool.clone()));

        let registry: Arc<dyn ToolRegistry> = Arc::new(DefaultToolRegistry::new());
        let registered = register_builtin_tools(
            registry.as_ref(),
            &BuiltinServices {
                remote,
                sandboxes: sandboxes.clone(),
                locker: locks.clone(),
                lock_timeout: config.locks.default_timeout(),
            },
        );

        let pipeline = Arc::new(SafetyPipeline::new(config.safety.clone(), Some(registry.clone())));
        let executor = ToolExecutor::new(registry, config.executor.clone())
            .with_pipeline(pipeline.clone())
            .with_audit(AuditSink::spawn(stores.audit.clone(), config.executor.audit_queue_capacity))
            .with_events(events);

        tracing::info!(
            tools = registered,
            region = %pool.region(),
            store = %config.store.backend,
            "Agent runtime initialized"
        );

        Self {
            config,
            stores,
            pipeline,
            executor,
            locks,
            messenger,
            pool,
            sandboxes,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn stores(&self) -> &RecordStores {
        &self.stores
    }

    pub fn pipeline(&self) -> &Arc<SafetyPipeline> {
        &self.pipeline
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn messenger(&self) -> &Arc<ChannelMessenger> {
        &self.messenger
    }

    pub fn pool(&self) -> &Arc<WarmPoolManager> {
        &self.pool
    }

    pub fn sandboxes(&self) -> &Arc<TaskSandboxes> {
        &self.sandboxes
    }

    /// Register an agent with the lock manager and give it a mailbox.
    pub fn register_agent(&self, agent_id: &str, role: &str) {
        self.locks.register_role(agent_id, role);
        self.messenger.register(agent_id);
    }

    /// Layer 2 check of a plan before any step runs.
    pub fn validate_plan(&self, plan: &AgentPlan) -> ValidationResult {
        self.pipeline.validate_plan(plan)
    }

    pub async fn execute(&self, tool_name: &str, params: Value, context: &AgentContext) -> ToolResult {
        self.executor
            .execute(tool_name, params, context, ExecuteOptions::default())
            .await
    }

    pub async fn execute_with(
        &self,
        tool_name: &str,
        params: Value,
        context: &AgentContext,
        options: ExecuteOptions,
    ) -> ToolResult {
        self.executor.execute(tool_name, params, context, options).await
    }

    /// End a task: free its concurrency slot, return its sandboxes and drop
    /// any locks its agent still holds.
    pub async fn finish_task(&self, context: &AgentContext) {
        self.pipeline.complete_task(&context.user_id, &context.task_id);
        let sandboxes = self.sandboxes.release_task_sandbox(&context.task_id).await;
        let locks = self.locks.force_release(context.lock_owner()).await;
        tracing::debug!(
            task_id = %context.task_id,
            sandboxes,
            locks = locks.len(),
            "Task finished"
        );
    }

    /// Start the lock sweeper and the pool scheduler. Both stop when `shutdown`
    /// is cancelled.
    pub fn start_background(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        let sweeper = Arc::new(LockSweeper::new(self.locks.clone()).with_shutdown(shutdown.child_token()));
        let scheduler = Arc::new(PoolScheduler::new(self.pool.clone()).with_shutdown(shutdown.child_token()));
        vec![sweeper.start(), scheduler.start()]
    }
}
