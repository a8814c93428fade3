#![deny(unused)]
//! Safety and governance for the agent runtime.
//!
//! This crate provides:
//! - The four-layer safety validation pipeline (input, plan, execution, output)
//! - The shared pattern library those layers match against
//! - Confirmation gates for dangerous tools
//! - Audit logging
//! - Distributed tracing and Prometheus metrics setup

pub mod approval;
pub mod audit;
pub mod execution;
pub mod input;
pub mod metrics;
pub mod output;
pub mod patterns;
pub mod pipeline;
pub mod plan;
pub mod tracing_layer;

pub use approval::{AutoApproveGate, ChannelConfirmationGate};
pub use audit::AuditSink;
pub use execution::ExecutionGate;
pub use input::InputValidator;
pub use metrics::setup_metrics_recorder;
pub use output::{mask_sensitive, mask_value, truncate_output, MaskReport, OutputValidator, SanitizedOutput};
pub use patterns::SensitiveKind;
pub use pipeline::{SafetyPipeline, SanitizedResult, ValidationReport, ValidationRequest};
pub use plan::PlanValidator;
pub use tracing_layer::configure_tracing;
