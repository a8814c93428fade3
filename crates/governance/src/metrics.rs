//! Metrics implementation using Prometheus.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

use agent_runtime_core::{Error, Result};

/// Install the Prometheus recorder. With `listen`, also serve `/metrics` on
/// that address.
pub fn setup_metrics_recorder(listen: Option<&str>) -> Result<Option<PrometheusHandle>> {
    let builder = PrometheusBuilder::new();

    match listen {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| Error::governance(format!("Invalid metrics address {}: {}", addr, e)))?;
            builder
                .with_http_listener(addr)
                .install()
                .map_err(|e| Error::governance(format!("Failed to install Prometheus exporter: {}", e)))?;
            tracing::info!(%addr, "Prometheus exporter listening");
            Ok(None)
        }
        None => {
            let handle = builder
                .install_recorder()
                .map_err(|e| Error::governance(format!("Failed to install Prometheus recorder: {}", e)))?;
            tracing::info!("Prometheus metrics recorder initialized");
            Ok(Some(handle))
        }
    }
}

/// Count and time one tool call.
pub fn track_tool_execution(tool: &str, success: bool, latency_sec: f64) {
    metrics::counter!(
        "tool_executions_total",
        "tool" => tool.to_string(),
        "success" => success.to_string()
    )
    .increment(1);

    metrics::histogram!("tool_execution_duration_seconds", "tool" => tool.to_string()).record(latency_sec);
}

pub fn track_validation_failure(layer: &'static str, code: &str) {
    metrics::counter!(
        "safety_validation_failures_total",
        "layer" => layer,
        "code" => code.to_string()
    )
    .increment(1);
}

pub fn track_lock_acquisition(acquired: bool, wait_sec: f64) {
    metrics::counter!("lock_acquisitions_total", "acquired" => acquired.to_string()).increment(1);
    metrics::histogram!("lock_wait_duration_seconds").record(wait_sec);
}

pub fn track_deadlock_prevented() {
    metrics::counter!("deadlocks_prevented_total").increment(1);
}

pub fn track_deadlock_victim() {
    metrics::counter!("deadlock_victims_total").increment(1);
}

/// Count a sandbox acquisition and its latency, split by warm or cold.
pub fn track_sandbox_acquisition(template: &str, warm: bool, latency_ms: f64) {
    let kind = if warm { "warm" } else { "cold" };
    metrics::counter!(
        "sandbox_acquisitions_total",
        "template" => template.to_string(),
        "kind" => kind
    )
    .increment(1);
    metrics::histogram!("sandbox_acquisition_latency_ms", "kind" => kind).record(latency_ms);
}

pub fn track_pool_size(region: &str, template: &str, warm: usize) {
    metrics::gauge!(
        "sandbox_pool_warm",
        "region" => region.to_string(),
        "template" => template.to_string()
    )
    .set(warm as f64);
}
