//! Mock implementations of core traits for testing.
//!
//! Shared by the unit and integration tests of every crate in the workspace.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    events::EventEnvelope,
    traits::{
        AgentMessage, AgentMessenger, ConfirmationHandler, EventEmitter, RemoteExecutor,
        RemoteTask, ResourceLocker, SandboxProvider, Tool, ToolRegistry,
    },
    types::{
        AgentContext, ConfirmationRequest, ConfirmationResponse, ContainerAcquisition,
        ContainerRecord, ContainerStatus, LockAcquisition, LockRefusal, ToolDefinition,
    },
    Error, Result,
};

// =============================================================================
// Mock Remote Executor
// =============================================================================

/// Records every remote task and echoes it back.
#[derive(Default)]
pub struct MockRemoteExecutor {
    tasks: Mutex<Vec<RemoteTask>>,
    failure: Mutex<Option<String>>,
}

impl MockRemoteExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn tasks(&self) -> Vec<RemoteTask> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for MockRemoteExecutor {
    async fn execute(&self, task: RemoteTask) -> Result<Value> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(Error::remote(message));
        }
        let echo = json!({ "task_type": task.task_type, "ok": true, "echo": task.parameters });
        self.tasks.lock().unwrap().push(task);
        Ok(echo)
    }
}

// =============================================================================
// Mock Confirmation Handler
// =============================================================================

/// Answers every confirmation the same way and keeps the requests.
pub struct StaticConfirmation {
    approve: bool,
    requests: Mutex<Vec<ConfirmationRequest>>,
}

impl StaticConfirmation {
    pub fn approve() -> Self {
        Self {
            approve: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn deny() -> Self {
        Self {
            approve: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ConfirmationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationHandler for StaticConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<ConfirmationResponse> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(if self.approve {
            ConfirmationResponse::approved("USER_APPROVED")
        } else {
            ConfirmationResponse::denied("denied by test", "USER_DENIED")
        })
    }
}

// =============================================================================
// Mock Tools
// =============================================================================

/// Tool that records its calls and returns a fixed response.
pub struct RecordingTool {
    definition: ToolDefinition,
    response: Value,
    delay: Option<Duration>,
    failure: Option<String>,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    pub fn new(definition: ToolDefinition, response: Value) -> Self {
        Self {
            definition,
            response,
            delay: None,
            failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, params: Value, _context: &AgentContext) -> Result<Value> {
        self.calls.lock().unwrap().push(params);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure {
            Some(ref message) => Err(Error::tool_execution(message.clone())),
            None => Ok(self.response.clone()),
        }
    }
}

/// Simple mock tool registry.
#[derive(Default)]
pub struct MockToolRegistry {
    tools: Mutex<HashMap<String, Arc<dyn Tool>>>,
}

impl MockToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with predefined tools.
    pub fn with_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        let registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool that only carries a definition.
    pub fn with_definitions(definitions: Vec<ToolDefinition>) -> Self {
        Self::with_tools(
            definitions
                .into_iter()
                .map(|d| Arc::new(RecordingTool::new(d, Value::Null)) as Arc<dyn Tool>)
                .collect(),
        )
    }
}

impl ToolRegistry for MockToolRegistry {
    fn register(&self, tool: Arc<dyn Tool>) {
        self.tools
            .lock()
            .unwrap()
            .insert(tool.name().to_string(), tool);
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.lock().unwrap().get(name).cloned()
    }

    fn list(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .lock()
            .unwrap()
            .values()
            .map(|t| t.definition().clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

// =============================================================================
// Mock Messenger / Emitter
// =============================================================================

/// Messenger that keeps every message, or fails on demand.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, String, AgentMessage)>>,
    fail: bool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// `(agent_id, role, message)` in send order.
    pub fn sent(&self) -> Vec<(String, String, AgentMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentMessenger for RecordingMessenger {
    async fn send_to_agent(&self, agent_id: &str, role: &str, message: AgentMessage) -> Result<()> {
        if self.fail {
            return Err(Error::messaging(format!("mailbox for {} unavailable", agent_id)));
        }
        self.sent
            .lock()
            .unwrap()
            .push((agent_id.to_string(), role.to_string(), message));
        Ok(())
    }
}

/// Emitter that keeps every event.
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<EventEnvelope>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventEmitter for RecordingEmitter {
    async fn emit(&self, event: EventEnvelope) {
        self.events.lock().unwrap().push(event);
    }
}

// =============================================================================
// Mock Coordination Seams
// =============================================================================

/// Non-blocking locker: a held resource is refused immediately as a timeout.
#[derive(Default)]
pub struct MockResourceLocker {
    held: Mutex<HashMap<String, String>>,
    history: Mutex<Vec<String>>,
}

impl MockResourceLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `acquire:<resource>` / `release:<resource>` entries in call order.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }

    pub fn holder(&self, resource: &str) -> Option<String> {
        self.held.lock().unwrap().get(resource).cloned()
    }
}

#[async_trait]
impl ResourceLocker for MockResourceLocker {
    async fn acquire(&self, owner: &str, resource: &str, _timeout: Duration) -> LockAcquisition {
        let mut held = self.held.lock().unwrap();
        match held.get(resource) {
            Some(holder) if holder != owner => {
                LockAcquisition::refused(LockRefusal::Timeout, Some(holder.clone()), 0)
            }
            _ => {
                held.insert(resource.to_string(), owner.to_string());
                self.history.lock().unwrap().push(format!("acquire:{}", resource));
                LockAcquisition::granted(0)
            }
        }
    }

    async fn release(&self, owner: &str, resource: &str) -> bool {
        let mut held = self.held.lock().unwrap();
        if held.get(resource).map(String::as_str) == Some(owner) {
            held.remove(resource);
            self.history.lock().unwrap().push(format!("release:{}", resource));
            true
        } else {
            false
        }
    }
}

/// Provider that always cold-starts a fresh assigned record.
#[derive(Default)]
pub struct MockSandboxProvider {
    acquired: Mutex<Vec<ContainerRecord>>,
    released: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockSandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `delay` to start each container.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn acquired(&self) -> Vec<ContainerRecord> {
        self.acquired.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxProvider for MockSandboxProvider {
    async fn acquire_sandbox(
        &self,
        template: &str,
        user_id: &str,
        task_id: &str,
    ) -> Result<ContainerAcquisition> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let now = Utc::now();
        let record = ContainerRecord {
            id: uuid::Uuid::new_v4().to_string(),
            template: template.to_string(),
            region: "test".to_string(),
            status: ContainerStatus::Assigned,
            created_at: now,
            assigned_at: Some(now),
            released_at: None,
            expires_at: now + ChronoDuration::minutes(10),
            user_id: Some(user_id.to_string()),
            task_id: Some(task_id.to_string()),
            pre_initialized: false,
        };
        self.acquired.lock().unwrap().push(record.clone());
        Ok(ContainerAcquisition {
            container: record,
            was_warm: false,
            latency_ms: 0,
            fallback_reason: Some("mock".to_string()),
        })
    }

    async fn release_sandbox(&self, container_id: &str) -> Result<()> {
        self.released.lock().unwrap().push(container_id.to_string());
        Ok(())
    }
}
