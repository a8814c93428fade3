//! Layer 3: real-time admission immediately before dispatch.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;

use agent_runtime_core::config::ExecutionLimits;
use agent_runtime_core::types::{
    codes, AgentContext, ConfirmationRequest, SafetyLevel, ToolCategory, ToolDefinition,
    ValidationResult,
};
use agent_runtime_core::SlidingWindowLimiter;

/// Browser tools that act on an existing page.
const BROWSER_INTERACTION_TOOLS: &[&str] = &["browser.click", "browser.type", "browser.screenshot"];

/// Layer 3 gate: category rate limits, per-user concurrency, confirmation of
/// dangerous tools, and resource availability.
#[derive(Debug, Default)]
pub struct ExecutionGate {
    limits: ExecutionLimits,
    limiter: SlidingWindowLimiter,
    /// user id -> task ids currently executing
    active: DashMap<String, HashSet<String>>,
}

impl ExecutionGate {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            limits,
            limiter: SlidingWindowLimiter::new(),
            active: DashMap::new(),
        }
    }

    /// Run every check, asking for confirmation when the tool needs it. On
    /// success the task is registered as active.
    pub async fn check(
        &self,
        definition: &ToolDefinition,
        params: &Value,
        context: &AgentContext,
    ) -> ValidationResult {
        self.run(definition, params, context, true).await
    }

    /// As [`check`](Self::check), for callers that already obtained
    /// confirmation themselves.
    pub async fn check_confirmed(
        &self,
        definition: &ToolDefinition,
        params: &Value,
        context: &AgentContext,
    ) -> ValidationResult {
        self.run(definition, params, context, false).await
    }

    async fn run(
        &self,
        definition: &ToolDefinition,
        params: &Value,
        context: &AgentContext,
        confirm: bool,
    ) -> ValidationResult {
        let started = Instant::now();
        let mut out = ValidationResult::new();

        let category = definition.category;
        let key = format!("{}:{}", category, context.user_id);
        if let Err(exceeded) = self.limiter.check_and_record(&key, self.limits.limit_for(category)) {
            out.error(
                codes::RATE_LIMIT_EXCEEDED,
                format!("{} tools: {}", category, exceeded),
                None,
            );
            return out.finish(started);
        }

        let max = self.limits.max_concurrent_tasks;
        let running = self.active_count_excluding(&context.user_id, &context.task_id);
        if running >= max {
            out.error(
                codes::CONCURRENT_LIMIT_EXCEEDED,
                format!("user {} already runs {} tasks, limit {}", context.user_id, running, max),
                None,
            );
            return out.finish(started);
        }
        if running + 1 == max {
            out.warn(
                codes::CONCURRENT_NEAR_LIMIT,
                format!("user {} is one task below the limit of {}", context.user_id, max),
                None,
            );
        }

        check_resources(definition, context, &mut out);

        if confirm && definition.requires_confirmation && definition.safety == SafetyLevel::Dangerous {
            match context.confirmation {
                Some(ref handler) => {
                    let request = ConfirmationRequest::new(
                        context,
                        definition.name.clone(),
                        params.clone(),
                        definition.risk_level(),
                    );
                    match handler.confirm(&request).await {
                        Ok(response) if response.is_approved() => {}
                        Ok(_) => out.error(
                            codes::CONFIRMATION_DENIED,
                            format!("{} was not confirmed", definition.name),
                            None,
                        ),
                        Err(e) => out.error(
                            codes::CONFIRMATION_DENIED,
                            format!("confirmation for {} failed: {}", definition.name, e),
                            None,
                        ),
                    }
                }
                None => out.warn(
                    codes::CONFIRMATION_UNAVAILABLE,
                    format!("{} is dangerous but no confirmation handler is attached", definition.name),
                    None,
                ),
            }
        }

        if out.errors.is_empty() && !self.try_register(&context.user_id, &context.task_id) {
            out.error(
                codes::CONCURRENT_LIMIT_EXCEEDED,
                format!("user {} reached {} concurrent tasks", context.user_id, max),
                None,
            );
        }

        out.finish(started)
    }

    fn active_count_excluding(&self, user_id: &str, task_id: &str) -> usize {
        self.active
            .get(user_id)
            .map(|set| set.iter().filter(|t| t.as_str() != task_id).count())
            .unwrap_or(0)
    }

    /// Atomically re-check the ceiling and add `task_id`.
    fn try_register(&self, user_id: &str, task_id: &str) -> bool {
        let mut set = self.active.entry(user_id.to_string()).or_default();
        if set.contains(task_id) {
            return true;
        }
        if set.len() >= self.limits.max_concurrent_tasks {
            return false;
        }
        set.insert(task_id.to_string());
        true
    }

    /// Mark a task active without running checks.
    pub fn register_task(&self, user_id: &str, task_id: &str) {
        self.active
            .entry(user_id.to_string())
            .or_default()
            .insert(task_id.to_string());
    }

    /// Remove a finished task from the user's active set.
    pub fn complete_task(&self, user_id: &str, task_id: &str) {
        let emptied = match self.active.get_mut(user_id) {
            Some(mut set) => {
                set.remove(task_id);
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            self.active.remove_if(user_id, |_, set| set.is_empty());
        }
    }

    pub fn active_tasks(&self, user_id: &str) -> usize {
        self.active.get(user_id).map(|s| s.len()).unwrap_or(0)
    }
}

fn check_resources(definition: &ToolDefinition, context: &AgentContext, out: &mut ValidationResult) {
    if definition.category == ToolCategory::File && context.workspace_path.is_none() {
        out.warn(
            codes::RESOURCE_UNAVAILABLE,
            "no workspace path; file operations use the sandbox default",
            Some("workspace_path"),
        );
    }
    if BROWSER_INTERACTION_TOOLS.contains(&definition.name.as_str()) && context.browser_session_id.is_none() {
        out.warn(
            codes::RESOURCE_UNAVAILABLE,
            "no browser session; the page may not be loaded",
            Some("browser_session_id"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_core::mocks::StaticConfirmation;
    use agent_runtime_core::types::RateLimit;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx(task: &str) -> AgentContext {
        AgentContext::new(task, "alice").with_all_permissions()
    }

    fn dangerous() -> ToolDefinition {
        ToolDefinition::new("shell.exec", ToolCategory::Shell)
            .with_safety(SafetyLevel::Dangerous)
            .with_confirmation()
    }

    #[tokio::test(start_paused = true)]
    async fn test_category_rate_limit() {
        let gate = ExecutionGate::new(ExecutionLimits {
            category_limits: HashMap::from([(ToolCategory::Search, RateLimit::new(2, 60_000))]),
            ..ExecutionLimits::default()
        });
        let def = ToolDefinition::new("search.web", ToolCategory::Search);
        for _ in 0..2 {
            let r = gate.check(&def, &json!({}), &ctx("t1")).await;
            assert!(r.valid, "{}", r.summary());
            gate.complete_task("alice", "t1");
        }
        let r = gate.check(&def, &json!({}), &ctx("t1")).await;
        assert!(r.has_error(codes::RATE_LIMIT_EXCEEDED));

        tokio::time::advance(std::time::Duration::from_millis(60_001)).await;
        assert!(gate.check(&def, &json!({}), &ctx("t1")).await.valid);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let gate = ExecutionGate::new(ExecutionLimits {
            max_concurrent_tasks: 2,
            ..ExecutionLimits::default()
        });
        let def = ToolDefinition::new("plan.update", ToolCategory::Plan);

        let first = gate.check(&def, &json!({}), &ctx("t1")).await;
        assert!(first.valid);
        assert!(!first.has_warning(codes::CONCURRENT_NEAR_LIMIT));
        let second = gate.check(&def, &json!({}), &ctx("t2")).await;
        assert!(second.valid);
        assert!(second.has_warning(codes::CONCURRENT_NEAR_LIMIT));
        assert_eq!(gate.active_tasks("alice"), 2);

        // the same task may issue further calls
        assert!(gate.check(&def, &json!({}), &ctx("t2")).await.valid);

        let third = gate.check(&def, &json!({}), &ctx("t3")).await;
        assert!(third.has_error(codes::CONCURRENT_LIMIT_EXCEEDED));

        gate.complete_task("alice", "t1");
        assert!(gate.check(&def, &json!({}), &ctx("t3")).await.valid);
    }

    #[tokio::test]
    async fn test_dangerous_tool_confirmation() {
        let gate = ExecutionGate::default();
        let deny = Arc::new(StaticConfirmation::deny());
        let r = gate
            .check(&dangerous(), &json!({"command": "ls"}), &ctx("t1").with_confirmation(deny.clone()))
            .await;
        assert!(r.has_error(codes::CONFIRMATION_DENIED));
        assert_eq!(deny.requests().len(), 1);
        assert_eq!(gate.active_tasks("alice"), 0);

        let approve = Arc::new(StaticConfirmation::approve());
        let r = gate
            .check(&dangerous(), &json!({"command": "ls"}), &ctx("t1").with_confirmation(approve))
            .await;
        assert!(r.valid);
    }

    #[tokio::test]
    async fn test_missing_handler_only_warns() {
        let gate = ExecutionGate::default();
        let r = gate.check(&dangerous(), &json!({"command": "ls"}), &ctx("t1")).await;
        assert!(r.valid);
        assert!(r.has_warning(codes::CONFIRMATION_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_check_confirmed_skips_prompt() {
        let gate = ExecutionGate::default();
        let deny = Arc::new(StaticConfirmation::deny());
        let r = gate
            .check_confirmed(&dangerous(), &json!({"command": "ls"}), &ctx("t1").with_confirmation(deny.clone()))
            .await;
        assert!(r.valid);
        assert!(deny.requests().is_empty());
    }

    #[tokio::test]
    async fn test_resource_soft_checks() {
        let gate = ExecutionGate::default();
        let click = ToolDefinition::new("browser.click", ToolCategory::Browser);
        let r = gate.check(&click, &json!({}), &ctx("t1")).await;
        assert!(r.valid);
        assert!(r.has_warning(codes::RESOURCE_UNAVAILABLE));

        let read = ToolDefinition::new("file.read", ToolCategory::File);
        let r = gate.check(&read, &json!({}), &ctx("t2").with_workspace("/work")).await;
        assert!(!r.has_warning(codes::RESOURCE_UNAVAILABLE));
    }
}
