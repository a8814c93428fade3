//! Built-in tools.
//!
//! Shell, file, browser and webdev tools run in a pooled sandbox on the
//! hosted backend. `search.web` goes to the backend without a sandbox.
//! `plan.*` and `message.*` are answered locally.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use agent_runtime_core::{
    schema::{FieldKind, FieldSpec, ParamSchema},
    traits::{RemoteExecutor, RemoteTask, ResourceLocker, Tool, ToolRegistry},
    types::{AgentContext, SafetyLevel, ToolCategory, ToolDefinition},
    Error, Result,
};

use crate::sandboxes::{template_for, TaskSandboxes};

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Tools that change a file and must hold `file:<path>` while they run.
const MUTATING_FILE_TOOLS: &[&str] = &["file.write", "file.edit", "file.delete"];

// =============================================================================
// Catalog
// =============================================================================

fn string(name: &str, description: &str) -> FieldSpec {
    FieldSpec::new(name, FieldKind::String, true).describe(description)
}

fn optional_string(name: &str, description: &str) -> FieldSpec {
    FieldSpec::new(name, FieldKind::String, false).describe(description)
}

/// Definitions of every built-in tool, sorted by name.
pub fn builtin_definitions() -> Vec<ToolDefinition> {
    let mut definitions = vec![
        ToolDefinition::new("shell.exec", ToolCategory::Shell)
            .with_description("Run a shell command in the task sandbox")
            .with_safety(SafetyLevel::Dangerous)
            .with_confirmation()
            .with_rate_limit(10, MINUTE_MS)
            .with_schema(
                ParamSchema::new()
                    .field(string("command", "Command line to execute"))
                    .field(FieldSpec::new("timeout_secs", FieldKind::Integer, false))
                    .optional("cwd", FieldKind::String),
            ),
        ToolDefinition::new("file.read", ToolCategory::File)
            .with_description("Read a file from the task workspace")
            .with_rate_limit(100, MINUTE_MS)
            .with_schema(
                ParamSchema::new()
                    .field(string("path", "Workspace-relative path"))
                    .optional("offset", FieldKind::Integer)
                    .optional("limit", FieldKind::Integer),
            ),
        ToolDefinition::new("file.write", ToolCategory::File)
            .with_description("Create or overwrite a file")
            .with_safety(SafetyLevel::Moderate)
            .with_rate_limit(50, MINUTE_MS)
            .with_schema(
                ParamSchema::new()
                    .field(string("path", "Workspace-relative path"))
                    .field(string("content", "Full file content")),
            ),
        ToolDefinition::new("file.edit", ToolCategory::File)
            .with_description("Replace a span of text in a file")
            .with_safety(SafetyLevel::Moderate)
            .with_rate_limit(50, MINUTE_MS)
            .with_schema(
                ParamSchema::new()
                    .field(string("path", "Workspace-relative path"))
                    .field(string("old_content", "Exact text to replace"))
                    .field(string("new_content", "Replacement text")),
            ),
        ToolDefinition::new("file.delete", ToolCategory::File)
            .with_description("Delete a file")
            .with_safety(SafetyLevel::Dangerous)
            .with_confirmation()
            .with_rate_limit(20, MINUTE_MS)
            .with_schema(ParamSchema::new().field(string("path", "Workspace-relative path"))),
        ToolDefinition::new("file.list", ToolCategory::File)
            .with_description("List a directory")
            .with_rate_limit(100, MINUTE_MS)
            .with_schema(
                ParamSchema::new()
                    .optional("path", FieldKind::String)
                    .optional("recursive", FieldKind::Boolean),
            ),
        ToolDefinition::new("browser.navigate", ToolCategory::Browser)
            .with_description("Open a URL in the task browser")
            .with_rate_limit(30, MINUTE_MS)
            .with_schema(ParamSchema::new().field(string("url", "Absolute http(s) URL"))),
        ToolDefinition::new("browser.click", ToolCategory::Browser)
            .with_description("Click an element on the current page")
            .with_safety(SafetyLevel::Moderate)
            .with_rate_limit(60, MINUTE_MS)
            .with_schema(ParamSchema::new().field(string("selector", "CSS selector"))),
        ToolDefinition::new("browser.type", ToolCategory::Browser)
            .with_description("Type text into an element on the current page")
            .with_safety(SafetyLevel::Moderate)
            .with_rate_limit(60, MINUTE_MS)
            .with_schema(
                ParamSchema::new()
                    .field(string("selector", "CSS selector"))
                    .field(string("text", "Text to type"))
                    .optional("submit", FieldKind::Boolean),
            ),
        ToolDefinition::new("browser.screenshot", ToolCategory::Browser)
            .with_description("Capture the current page")
            .with_rate_limit(30, MINUTE_MS)
            .with_schema(ParamSchema::new().optional("full_page", FieldKind::Boolean)),
        ToolDefinition::new("search.web", ToolCategory::Search)
            .with_description("Search the web")
            .with_rate_limit(20, MINUTE_MS)
            .with_schema(
                ParamSchema::new()
                    .field(string("query", "Search terms").max_length(500))
                    .optional("max_results", FieldKind::Integer),
            ),
        ToolDefinition::new("webdev.init", ToolCategory::Webdev)
            .with_description("Scaffold a web project in the workspace")
            .with_safety(SafetyLevel::Moderate)
            .with_rate_limit(5, HOUR_MS)
            .with_schema(
                ParamSchema::new()
                    .field(string("name", "Project name").max_length(64))
                    .field(
                        optional_string("framework", "Project template")
                            .one_of(["static", "react", "vue", "next"]),
                    ),
            ),
        ToolDefinition::new("webdev.deploy", ToolCategory::Webdev)
            .with_description("Publish the workspace project")
            .with_safety(SafetyLevel::Dangerous)
            .with_confirmation()
            .with_rate_limit(5, HOUR_MS)
            .with_schema(
                ParamSchema::new()
                    .field(string("project", "Project name"))
                    .field(optional_string("target", "Deployment target").one_of(["preview", "production"])),
            ),
        ToolDefinition::new("plan.update", ToolCategory::Plan)
            .with_description("Record the current plan and progress")
            .with_rate_limit(100, MINUTE_MS)
            .with_schema(
                ParamSchema::new()
                    .required("steps", FieldKind::Array)
                    .optional("current_step", FieldKind::Integer),
            ),
        ToolDefinition::new("message.notify", ToolCategory::Message)
            .with_description("Send a progress message to the user")
            .with_rate_limit(30, MINUTE_MS)
            .with_schema(
                ParamSchema::new()
                    .field(string("text", "Message body").max_length(4000))
                    .field(optional_string("level", "Severity").one_of(["info", "warning", "error"])),
            ),
    ];
    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    definitions
}

/// Collaborators the built-in capabilities call into.
#[derive(Clone)]
pub struct BuiltinServices {
    pub remote: Arc<dyn RemoteExecutor>,
    pub sandboxes: Arc<TaskSandboxes>,
    pub locker: Arc<dyn ResourceLocker>,
    pub lock_timeout: Duration,
}

/// Register every built-in tool. Returns how many were registered.
pub fn register_builtin_tools(registry: &dyn ToolRegistry, services: &BuiltinServices) -> usize {
    let definitions = builtin_definitions();
    let count = definitions.len();
    for definition in definitions {
        let tool: Arc<dyn Tool> = match definition.category {
            ToolCategory::Plan => Arc::new(PlanUpdateTool { definition }),
            ToolCategory::Message => Arc::new(NotifyTool { definition }),
            _ => Arc::new(RemoteTool::new(definition, services.clone())),
        };
        registry.register(tool);
    }
    count
}

// =============================================================================
// Remote Tool
// =============================================================================

/// Forwards the call to the hosted backend, inside the task's sandbox when
/// the category needs one.
pub struct RemoteTool {
    definition: ToolDefinition,
    dispatcher: Dispatcher,
}

/// Owned half of a [`RemoteTool`] that a detached call can carry.
#[derive(Clone)]
struct Dispatcher {
    task_type: String,
    category: ToolCategory,
    services: BuiltinServices,
}

impl RemoteTool {
    pub fn new(definition: ToolDefinition, services: BuiltinServices) -> Self {
        let dispatcher = Dispatcher {
            task_type: definition.name.replace('.', "_"),
            category: definition.category,
            services,
        };
        Self {
            definition,
            dispatcher,
        }
    }

    fn lock_resource(&self, params: &Value) -> Option<String> {
        if !MUTATING_FILE_TOOLS.contains(&self.definition.name.as_str()) {
            return None;
        }
        params
            .get("path")
            .and_then(Value::as_str)
            .map(|path| format!("file:{}", path))
    }
}

impl Dispatcher {
    async fn dispatch(&self, params: &Value, context: &AgentContext) -> Result<Value> {
        let mut task = RemoteTask::new(self.task_type.clone())
            .with_params(params)
            .with_param("task_id", json!(context.task_id));
        if let Some(ref workspace) = context.workspace_path {
            task = task.with_param("workspace_path", json!(workspace));
        }
        if let Some(ref session) = context.browser_session_id {
            task = task.with_param("browser_session_id", json!(session));
        }
        if self.category.needs_sandbox() {
            let template = template_for(self.category);
            let container = self
                .services
                .sandboxes
                .container_for(&context.task_id, &context.user_id, template)
                .await?;
            task = task.with_param(
                "container",
                json!({
                    "id": container.id,
                    "template": container.template,
                    "region": container.region,
                }),
            );
        }
        self.services.remote.execute(task).await
    }

    /// Dispatch while holding `resource`, releasing it afterwards.
    async fn dispatch_locked(self, resource: String, params: Value, context: AgentContext) -> Result<Value> {
        let owner = context.lock_owner();
        let lock = self
            .services
            .locker
            .acquire(owner, &resource, self.services.lock_timeout)
            .await;
        if !lock.acquired {
            return Err(Error::lock(format!(
                "{} is held by {} ({:?})",
                resource,
                lock.holder.as_deref().unwrap_or("unknown"),
                lock.refusal
            )));
        }

        let result = self.dispatch(&params, &context).await;
        self.services.locker.release(owner, &resource).await;
        result
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, params: Value, context: &AgentContext) -> Result<Value> {
        let Some(resource) = self.lock_resource(&params) else {
            return self.dispatcher.dispatch(&params, context).await;
        };

        // Runs detached: a caller that times out or is cancelled stops
        // waiting, but the call still finishes and releases the lock.
        let call = self
            .dispatcher
            .clone()
            .dispatch_locked(resource, params, context.clone());
        tokio::spawn(call)
            .await
            .map_err(|e| Error::internal(format!("{} call aborted: {}", self.definition.name, e)))?
    }
}

// =============================================================================
// Local Tools
// =============================================================================

/// Acknowledges a plan update.
pub struct PlanUpdateTool {
    definition: ToolDefinition,
}

#[async_trait]
impl Tool for PlanUpdateTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, params: Value, context: &AgentContext) -> Result<Value> {
        let steps = params
            .get("steps")
            .and_then(Value::as_array)
            .map(|s| s.len())
            .ok_or_else(|| Error::invalid_request("steps must be an array"))?;
        let current = params.get("current_step").and_then(Value::as_u64);
        if let Some(current) = current {
            if current as usize >= steps.max(1) {
                return Err(Error::invalid_request(format!(
                    "current_step {} is outside a plan of {} steps",
                    current, steps
                )));
            }
        }
        Ok(json!({
            "acknowledged": true,
            "task_id": context.task_id,
            "steps": steps,
            "current_step": current,
        }))
    }
}

/// Acknowledges a user notification.
pub struct NotifyTool {
    definition: ToolDefinition,
}

#[async_trait]
impl Tool for NotifyTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, params: Value, context: &AgentContext) -> Result<Value> {
        let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
        tracing::info!(task_id = %context.task_id, level, "Agent notification");
        Ok(json!({
            "delivered": true,
            "task_id": context.task_id,
            "level": level,
        }))
    }
}
