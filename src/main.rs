#![deny(unused)]
//! Agent runtime daemon.
//!
//! Loads layered configuration, installs tracing and metrics, then runs the
//! lock sweeper and warm pool scheduler until Ctrl-C.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use agent_runtime::AgentRuntime;
use agent_runtime_core::config::AppConfig;
use agent_runtime_skills::HttpRemoteExecutor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    agent_runtime_governance::configure_tracing(config.observability.json_logs)?;
    tracing::info!("Starting agent runtime v{}", env!("CARGO_PKG_VERSION"));

    let _metrics = agent_runtime_governance::setup_metrics_recorder(config.observability.metrics_addr.as_deref())?;

    let remote = Arc::new(HttpRemoteExecutor::new(
        &config.executor.remote_url,
        config.executor.remote_timeout(),
    )?);
    tracing::info!(endpoint = %remote.endpoint(), "Remote executor configured");

    let runtime = AgentRuntime::new(config, remote)?;

    // Fill the pool before the first tick so early tasks start warm.
    match runtime.pool().replenish_once().await {
        Ok(report) => tracing::info!(created = report.values().sum::<usize>(), "Initial warm pool ready"),
        Err(e) => tracing::warn!(error = %e, "Initial pool replenishment failed"),
    }

    let shutdown = CancellationToken::new();
    let handles = runtime.start_background(&shutdown);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, shutting down");
    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    Ok(())
}
