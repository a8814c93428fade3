//! Background replenishment and cleanup for the warm pool.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::pool::WarmPoolManager;

/// Drives [`WarmPoolManager::replenish_once`] and
/// [`WarmPoolManager::cleanup_once`] on their configured intervals until the
/// shutdown token fires.
pub struct PoolScheduler {
    pool: Arc<WarmPoolManager>,
    shutdown_token: CancellationToken,
}

impl PoolScheduler {
    pub fn new(pool: Arc<WarmPoolManager>) -> Self {
        Self {
            pool,
            shutdown_token: CancellationToken::new(),
        }
    }

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
        let settings = self.pool.settings();
        tracing::info!(
            region = %self.pool.region(),
            replenish_ms = settings.replenish_interval_ms,
            cleanup_ms = settings.cleanup_interval_ms,
            "Starting warm pool scheduler"
        );

        let mut replenish = interval(settings.replenish_interval());
        replenish.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup = interval(settings.cleanup_interval());
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = replenish.tick() => {
                    if let Err(e) = self.pool.replenish_once().await {
                        tracing::warn!(error = %e, "Pool replenishment failed");
                    }
                }
                _ = cleanup.tick() => {
                    if let Err(e) = self.pool.cleanup_once(Utc::now()).await {
                        tracing::warn!(error = %e, "Pool cleanup failed");
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Shutdown signal received, stopping warm pool scheduler");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_core::config::PoolSettings;
    use agent_runtime_store::InMemoryRecordStore;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_fills_pool_then_stops() {
        let store = Arc::new(InMemoryRecordStore::new());
        let pool = Arc::new(WarmPoolManager::new(PoolSettings::default(), store.clone()));
        let scheduler = Arc::new(PoolScheduler::new(pool.clone()));
        let token = scheduler.shutdown_token();
        let handle = scheduler.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.container_count() > 0);

        token.cancel();
        handle.await.unwrap();
    }
}
