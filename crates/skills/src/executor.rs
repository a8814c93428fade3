//! Tool executor.
//!
//! Every call goes through the same gauntlet before the capability runs:
//! lookup, permission, per-(tool, user) rate limit, parameter schema, safety
//! Layer 1 when a pipeline is attached, confirmation, then Layer 3. The
//! capability then races a timeout and an optional cancellation token. Its
//! output is cut to the output budget and passed through Layer 4.
//!
//! Failures never escape as errors: each is a [`ToolResult`] with
//! `success: false` and a [`ToolErrorCode`].

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use agent_runtime_core::{
    config::ExecutorConfig,
    events::{EventEnvelope, EventSeverity, EventType, ToolExecPayload},
    rate_limit::SlidingWindowLimiter,
    traits::{EventEmitter, NoOpEventEmitter, Tool, ToolRegistry},
    types::{
        AgentContext, AuditEntry, ConfirmationRequest, ConfirmationResponse, ToolDefinition,
        ToolErrorCode, ToolResult, ValidationResult,
    },
};
use agent_runtime_governance::{metrics::track_tool_execution, AuditSink, SafetyPipeline};

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Replaces the configured default timeout.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

pub struct ToolExecutor {
    registry: Arc<dyn ToolRegistry>,
    config: ExecutorConfig,
    limiter: SlidingWindowLimiter,
    pipeline: Option<Arc<SafetyPipeline>>,
    audit: Option<AuditSink>,
    events: Arc<dyn EventEmitter>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<dyn ToolRegistry>, config: ExecutorConfig) -> Self {
        Self {
            registry,
            config,
            limiter: SlidingWindowLimiter::new(),
            pipeline: None,
            audit: None,
            events: Arc::new(NoOpEventEmitter),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<SafetyPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_audit(mut self, audit: AuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
        &self.registry
    }

    /// Run `name` with `params` on behalf of `context`.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        context: &AgentContext,
        options: ExecuteOptions,
    ) -> ToolResult {
        let started = Instant::now();
        let mut result = self.run(name, params, context, options).await;
        result.duration_ms = started.elapsed().as_millis() as u64;

        let code = result.error_code.map(|c| c.as_str().to_string());
        track_tool_execution(name, result.success, started.elapsed().as_secs_f64());
        if result.success {
            tracing::debug!(tool = name, task_id = %context.task_id, duration_ms = result.duration_ms, "Tool call succeeded");
        } else {
            tracing::info!(
                tool = name,
                task_id = %context.task_id,
                code = ?code,
                error = ?result.error,
                "Tool call failed"
            );
        }
        if let Some(ref audit) = self.audit {
            audit.record(
                AuditEntry::new(name, &context.task_id, &context.user_id).with_outcome(
                    result.success,
                    result.duration_ms,
                    code.clone(),
                ),
            );
        }
        let payload = ToolExecPayload {
            tool_name: name.to_string(),
            success: result.success,
            duration_ms: result.duration_ms,
            error_code: code,
        };
        let severity = if result.success {
            EventSeverity::Info
        } else {
            EventSeverity::Warning
        };
        self.events
            .emit(
                EventEnvelope::new(EventType::ToolExecFinished, json!(payload))
                    .with_task(&context.task_id)
                    .with_actor(context.lock_owner())
                    .with_severity(severity),
            )
            .await;
        result
    }

    async fn run(
        &self,
        name: &str,
        params: Value,
        context: &AgentContext,
        options: ExecuteOptions,
    ) -> ToolResult {
        let Some(tool) = self.registry.get(name) else {
            return ToolResult::failure(ToolErrorCode::NotFound, format!("tool {} is not registered", name));
        };
        let definition = tool.definition().clone();

        if !context.allows(definition.category) {
            return ToolResult::failure(
                ToolErrorCode::PermissionDenied,
                format!("task {} may not use {} tools", context.task_id, definition.category),
            );
        }

        let key = format!("{}:{}", name, context.user_id);
        if let Err(exceeded) = self.limiter.check_and_record(&key, definition.rate_limit) {
            return ToolResult::failure(
                ToolErrorCode::RateLimitExceeded,
                format!("{}: {}", name, exceeded),
            )
            .with_metadata("retry_after_secs", exceeded.retry_after_secs);
        }

        if let Err(violations) = definition.schema.validate(&params) {
            let message = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return ToolResult::failure(ToolErrorCode::InvalidParams, format!("{}: {}", name, message));
        }

        // Layer 1 runs before anyone is asked to approve the call.
        if let Some(ref pipeline) = self.pipeline {
            let validation = pipeline.validate_input(&definition, &params);
            if !validation.valid {
                return validation_failure(&validation);
            }
        }

        let mut unconfirmed = false;
        if definition.requires_confirmation {
            match self.confirm(&definition, &params, context).await {
                Ok(confirmed) => unconfirmed = !confirmed,
                Err(denied) => return denied,
            }
        }

        if let Some(ref pipeline) = self.pipeline {
            let validation = pipeline
                .validate_execution_confirmed(&definition, &params, context)
                .await;
            if !validation.valid {
                return validation_failure(&validation);
            }
        }

        let timeout = options.timeout.unwrap_or_else(|| self.config.default_timeout());
        let mut result = match self.invoke(tool, params, context, timeout, options.cancel).await {
            Ok(output) => ToolResult::ok(output),
            Err(failure) => failure,
        };
        if unconfirmed {
            result = result.with_metadata("unconfirmed", true);
        }
        if !result.success {
            return result;
        }

        let result = self.cut_output(result);
        match self.pipeline {
            Some(ref pipeline) => {
                let sanitized = pipeline.sanitize_and_validate(result);
                if sanitized.validation.has_critical() {
                    let message = sanitized
                        .validation
                        .errors
                        .iter()
                        .map(|e| e.message.as_str())
                        .collect::<Vec<_>>()
                        .join("; ");
                    return ToolResult::failure(ToolErrorCode::ValidationFailed, message);
                }
                sanitized.result
            }
            None => result,
        }
    }

    /// `Ok(true)` when a human approved, `Ok(false)` when no handler was
    /// available and the call may proceed unconfirmed.
    async fn confirm(
        &self,
        definition: &ToolDefinition,
        params: &Value,
        context: &AgentContext,
    ) -> Result<bool, ToolResult> {
        let Some(ref handler) = context.confirmation else {
            if self.config.require_confirmation_handler {
                return Err(ToolResult::failure(
                    ToolErrorCode::UserDenied,
                    format!("{} requires confirmation and no handler is attached", definition.name),
                ));
            }
            tracing::warn!(tool = %definition.name, task_id = %context.task_id, "No confirmation handler, proceeding unconfirmed");
            return Ok(false);
        };

        let request = ConfirmationRequest::new(
            context,
            definition.name.clone(),
            params.clone(),
            definition.risk_level(),
        );
        match handler.confirm(&request).await {
            Ok(ConfirmationResponse::Approved { .. }) => Ok(true),
            Ok(ConfirmationResponse::Denied { reason, reason_code }) => Err(ToolResult::failure(
                ToolErrorCode::UserDenied,
                format!("{} denied: {}", definition.name, reason),
            )
            .with_metadata("reason_code", reason_code)),
            Err(e) => Err(ToolResult::failure(
                ToolErrorCode::UserDenied,
                format!("confirmation for {} failed: {}", definition.name, e),
            )),
        }
    }

    async fn invoke(
        &self,
        tool: Arc<dyn Tool>,
        params: Value,
        context: &AgentContext,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, ToolResult> {
        let call = tokio::time::timeout(timeout, tool.execute(params, context));
        let outcome = match cancel {
            Some(token) => tokio::select! {
                outcome = call => outcome,
                _ = token.cancelled() => {
                    return Err(ToolResult::failure(ToolErrorCode::Cancelled, format!("{} was cancelled", tool.name())));
                }
            },
            None => call.await,
        };
        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ToolResult::failure(ToolErrorCode::ExecutionFailed, e.to_string())),
            Err(_) => Err(ToolResult::failure(
                ToolErrorCode::Timeout,
                format!("{} timed out after {} ms", tool.name(), timeout.as_millis()),
            )),
        }
    }

    /// Literal cut of the serialized output on a char boundary.
    fn cut_output(&self, mut result: ToolResult) -> ToolResult {
        let Some(ref output) = result.output else {
            return result;
        };
        let serialized = output.to_string();
        let budget = self.config.max_output_bytes;
        if serialized.len() <= budget {
            return result;
        }
        let mut end = budget;
        while !serialized.is_char_boundary(end) {
            end -= 1;
        }
        result.output = Some(Value::String(serialized[..end].to_string()));
        result.truncated = true;
        result
            .metadata
            .insert("original_size".into(), json!(serialized.len()));
        result
    }
}

fn validation_failure(validation: &ValidationResult) -> ToolResult {
    let codes: Vec<_> = validation.errors.iter().map(|e| e.code.clone()).collect();
    let message = validation
        .errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    ToolResult::failure(ToolErrorCode::ValidationFailed, message).with_metadata("validation_errors", codes)
}
