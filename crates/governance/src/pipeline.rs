//! Composition of the four safety layers.

use serde_json::Value;
use std::sync::Arc;

use agent_runtime_core::config::SafetyConfig;
use agent_runtime_core::traits::ToolRegistry;
use agent_runtime_core::types::{AgentContext, AgentPlan, ToolDefinition, ToolResult, ValidationResult};

use crate::execution::ExecutionGate;
use crate::input::InputValidator;
use crate::metrics::track_validation_failure;
use crate::output::{MaskReport, OutputValidator};
use crate::plan::PlanValidator;

/// Everything [`SafetyPipeline::validate_all`] may look at.
pub struct ValidationRequest<'a> {
    pub definition: &'a ToolDefinition,
    pub params: &'a Value,
    pub context: &'a AgentContext,
    pub plan: Option<&'a AgentPlan>,
    pub result: Option<&'a ToolResult>,
}

/// Per-layer outcome of [`SafetyPipeline::validate_all`]. A layer that did
/// not run is `None`.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub input: Option<ValidationResult>,
    pub plan: Option<ValidationResult>,
    pub execution: Option<ValidationResult>,
    pub output: Option<ValidationResult>,
}

impl ValidationReport {
    pub fn valid(&self) -> bool {
        self.layers().all(|r| r.valid)
    }

    /// All findings folded into one result.
    pub fn merged(&self) -> ValidationResult {
        let mut merged = ValidationResult::new();
        for layer in self.layers() {
            merged.merge(layer.clone());
        }
        merged
    }

    fn layers(&self) -> impl Iterator<Item = &ValidationResult> {
        [&self.input, &self.plan, &self.execution, &self.output]
            .into_iter()
            .flatten()
    }
}

/// Output of [`SafetyPipeline::sanitize_and_validate`].
#[derive(Debug, Clone)]
pub struct SanitizedResult {
    pub result: ToolResult,
    pub validation: ValidationResult,
    pub masked: MaskReport,
}

/// The four safety layers behind one handle.
pub struct SafetyPipeline {
    input: InputValidator,
    plan: PlanValidator,
    execution: ExecutionGate,
    output: OutputValidator,
}

impl Default for SafetyPipeline {
    fn default() -> Self {
        Self::new(SafetyConfig::default(), None)
    }
}

impl SafetyPipeline {
    /// With a registry, Layer 2 also checks that every plan step names a
    /// registered tool.
    pub fn new(config: SafetyConfig, registry: Option<Arc<dyn ToolRegistry>>) -> Self {
        let mut plan = PlanValidator::new(config.plan);
        if let Some(registry) = registry {
            plan = plan.with_registry(registry);
        }
        Self {
            input: InputValidator::new(config.input),
            plan,
            execution: ExecutionGate::new(config.execution),
            output: OutputValidator::new(config.output),
        }
    }

    pub fn validate_input(&self, definition: &ToolDefinition, params: &Value) -> ValidationResult {
        record_failures("input", self.input.validate(definition, params))
    }

    pub fn validate_plan(&self, plan: &AgentPlan) -> ValidationResult {
        record_failures("plan", self.plan.validate(plan))
    }

    pub async fn validate_execution(
        &self,
        definition: &ToolDefinition,
        params: &Value,
        context: &AgentContext,
    ) -> ValidationResult {
        record_failures("execution", self.execution.check(definition, params, context).await)
    }

    pub fn validate_output(&self, result: &ToolResult) -> ValidationResult {
        record_failures("output", self.output.validate(result))
    }

    /// Layer 1, then Layer 3 only when Layer 1 passes.
    pub async fn validate_pre_execution(
        &self,
        definition: &ToolDefinition,
        params: &Value,
        context: &AgentContext,
    ) -> ValidationResult {
        let mut result = self.validate_input(definition, params);
        if !result.valid {
            return result;
        }
        result.merge(self.validate_execution(definition, params, context).await);
        result
    }

    /// Layer 3 for a call whose confirmation the caller already handled.
    pub async fn validate_execution_confirmed(
        &self,
        definition: &ToolDefinition,
        params: &Value,
        context: &AgentContext,
    ) -> ValidationResult {
        record_failures(
            "execution",
            self.execution.check_confirmed(definition, params, context).await,
        )
    }

    /// Every applicable layer. Layer 3 runs only when Layer 1 passes;
    /// Layers 2 and 4 run whenever their input is present.
    pub async fn validate_all(&self, request: ValidationRequest<'_>) -> ValidationReport {
        let input = self.validate_input(request.definition, request.params);
        let execution = if input.valid {
            Some(
                self.validate_execution(request.definition, request.params, request.context)
                    .await,
            )
        } else {
            None
        };
        ValidationReport {
            input: Some(input),
            execution,
            plan: request.plan.map(|p| self.validate_plan(p)),
            output: request.result.map(|r| self.validate_output(r)),
        }
    }

    /// Mask and truncate the output, then run Layer 4 on what remains.
    /// Malware survives masking, so a critical finding is still reported.
    pub fn sanitize_and_validate(&self, result: ToolResult) -> SanitizedResult {
        let (result, masked) = self.output.sanitize_result(result);
        let validation = self.validate_output(&result);
        SanitizedResult {
            result,
            validation,
            masked,
        }
    }

    /// Release the task's concurrency slot.
    pub fn complete_task(&self, user_id: &str, task_id: &str) {
        self.execution.complete_task(user_id, task_id);
    }

    pub fn active_tasks(&self, user_id: &str) -> usize {
        self.execution.active_tasks(user_id)
    }

    pub fn max_output_bytes(&self) -> usize {
        self.output.max_output_bytes()
    }
}

fn record_failures(layer: &'static str, result: ValidationResult) -> ValidationResult {
    if !result.valid {
        for error in &result.errors {
            track_validation_failure(layer, &error.code);
        }
        tracing::debug!(layer, errors = %result.summary(), "Safety validation failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_core::mocks::MockToolRegistry;
    use agent_runtime_core::schema::{FieldKind, ParamSchema};
    use agent_runtime_core::types::{codes, PlanStep, ToolCategory};
    use serde_json::json;

    fn shell() -> ToolDefinition {
        ToolDefinition::new("shell.exec", ToolCategory::Shell)
            .with_schema(ParamSchema::new().required("command", FieldKind::String))
    }

    fn ctx() -> AgentContext {
        AgentContext::new("t1", "alice").with_all_permissions()
    }

    #[tokio::test]
    async fn test_layer_three_skipped_when_input_fails() {
        let pipeline = SafetyPipeline::default();
        let result = pipeline
            .validate_pre_execution(&shell(), &json!({"command": "rm -rf / "}), &ctx())
            .await;
        assert!(result.has_error(codes::BLOCKED_COMMAND));
        assert_eq!(pipeline.active_tasks("alice"), 0);

        let result = pipeline
            .validate_pre_execution(&shell(), &json!({"command": "ls"}), &ctx())
            .await;
        assert!(result.valid, "{}", result.summary());
        assert_eq!(pipeline.active_tasks("alice"), 1);

        pipeline.complete_task("alice", "t1");
        assert_eq!(pipeline.active_tasks("alice"), 0);
    }

    #[tokio::test]
    async fn test_validate_all_runs_plan_and_output_independently() {
        let registry: Arc<dyn ToolRegistry> = Arc::new(MockToolRegistry::with_definitions(vec![shell()]));
        let pipeline = SafetyPipeline::new(SafetyConfig::default(), Some(registry));

        let plan = AgentPlan::new("p1")
            .with_step(PlanStep::new("a", "shell.exec", json!({"command": "ls"})))
            .with_step(PlanStep::new("b", "file.read", json!({"path": "x"})));
        let result = ToolResult::ok(json!({"stdout": "ok"}));

        let report = pipeline
            .validate_all(ValidationRequest {
                definition: &shell(),
                params: &json!({"cmd": "ls"}),
                context: &ctx(),
                plan: Some(&plan),
                result: Some(&result),
            })
            .await;

        assert!(!report.valid());
        assert!(report.execution.is_none());
        assert!(report.plan.as_ref().unwrap().has_error(codes::TOOL_NOT_FOUND));
        assert!(report.output.as_ref().unwrap().valid);
        let merged = report.merged();
        assert!(merged.has_error(codes::SCHEMA_VIOLATION));
        assert!(merged.has_error(codes::TOOL_NOT_FOUND));
    }

    #[test]
    fn test_sanitize_masks_and_flags_malware() {
        let pipeline = SafetyPipeline::default();
        let clean = pipeline.sanitize_and_validate(ToolResult::ok(json!({"text": "mail ann@example.com"})));
        assert!(clean.validation.valid);
        assert_eq!(clean.masked.total(), 1);
        assert_eq!(clean.result.output, Some(json!({"text": "mail [REDACTED_EMAIL]"})));

        let bad = pipeline.sanitize_and_validate(ToolResult::ok(json!({"script": "eval(atob('ZXZpbA=='))"})));
        assert!(bad.validation.has_critical());
    }
}
