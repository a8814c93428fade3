//! Background lease sweeper.
//!
//! Every tick drops expired leases and breaks any wait-for cycle that slipped
//! past prevention, e.g. after an expired lease changed hands mid-wait.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::manager::LockManager;

/// Result of one sweep tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub victims: Vec<String>,
}

pub struct LockSweeper {
    manager: Arc<LockManager>,
    shutdown_token: CancellationToken,
}

impl LockSweeper {
    pub fn new(manager: Arc<LockManager>) -> Self {
        Self {
            manager,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Share an existing token so one signal stops every background loop.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        let period = self.manager.config().sweep_interval();
        tracing::info!(interval_ms = period.as_millis() as u64, "Starting lock sweeper");
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let report = self.sweep_once().await;
                    if report.expired > 0 || !report.victims.is_empty() {
                        tracing::info!(expired = report.expired, victims = ?report.victims, "Lock sweep finished");
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Shutdown signal received, stopping lock sweeper");
                    break;
                }
            }
        }
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let expired = self.manager.sweep_expired(Utc::now()).await.len();
        let mut victims = Vec::new();
        for cycle in self.manager.find_all_cycles() {
            if let Some(victim) = self.manager.resolve_deadlock(&cycle).await {
                victims.push(victim);
            }
        }
        SweepReport { expired, victims }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_core::config::LockConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweep_once_clears_expired_leases() {
        let manager = Arc::new(LockManager::new(LockConfig {
            lease_ttl_ms: 1,
            ..LockConfig::default()
        }));
        assert!(manager.acquire_lock("a", "r1", Duration::from_secs(1)).await.acquired);
        std::thread::sleep(Duration::from_millis(5));

        let sweeper = LockSweeper::new(manager.clone());
        let report = sweeper.sweep_once().await;
        assert_eq!(report.expired, 1);
        assert!(report.victims.is_empty());
        assert!(manager.lock_status("r1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_on_shutdown() {
        let sweeper = Arc::new(LockSweeper::new(Arc::new(LockManager::default())));
        let token = sweeper.shutdown_token();
        let handle = sweeper.start();
        tokio::time::sleep(Duration::from_secs(61)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
