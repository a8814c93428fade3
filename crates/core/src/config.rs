use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::types::{RateLimit, ToolCategory};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub executor: ExecutorConfig,
    pub safety: SafetyConfig,
    pub locks: LockConfig,
    pub pool: PoolSettings,
    pub store: StoreConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    pub default_timeout_ms: u64,
    pub max_output_bytes: usize,
    /// Refuse confirmation-gated tools when the context carries no handler.
    pub require_confirmation_handler: bool,
    pub audit_queue_capacity: usize,
    /// Base URL of the hosted execution backend.
    pub remote_url: String,
    pub remote_timeout_ms: u64,
}

impl ExecutorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_output_bytes: 50 * 1024,
            require_confirmation_handler: false,
            audit_queue_capacity: 1024,
            remote_url: "http://127.0.0.1:8080/".into(),
            remote_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SafetyConfig {
    pub input: InputLimits,
    pub plan: PlanLimits,
    pub execution: ExecutionLimits,
    pub output: OutputLimits,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InputLimits {
    pub max_param_bytes: usize,
    pub max_command_length: usize,
    pub max_file_content_bytes: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_param_bytes: 100 * 1024,
            max_command_length: 10_000,
            max_file_content_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlanLimits {
    pub max_steps: usize,
    pub max_duration_ms: u64,
    pub max_cost_usd: f64,
    /// A step fingerprint repeated more often than this is a loop risk.
    pub duplicate_step_threshold: usize,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_duration_ms: 5 * 60 * 1000,
            max_cost_usd: 1.0,
            duplicate_step_threshold: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionLimits {
    pub max_concurrent_tasks: usize,
    pub category_limits: HashMap<ToolCategory, RateLimit>,
}

impl ExecutionLimits {
    /// Rate limit for a category, falling back to a permissive default.
    pub fn limit_for(&self, category: ToolCategory) -> RateLimit {
        self.category_limits
            .get(&category)
            .copied()
            .unwrap_or(RateLimit::new(100, 60_000))
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        let category_limits = HashMap::from([
            (ToolCategory::Shell, RateLimit::new(10, 60_000)),
            (ToolCategory::File, RateLimit::new(50, 60_000)),
            (ToolCategory::Browser, RateLimit::new(20, 60_000)),
            (ToolCategory::Search, RateLimit::new(30, 60_000)),
            (ToolCategory::Webdev, RateLimit::new(10, 60_000)),
            (ToolCategory::Plan, RateLimit::new(100, 60_000)),
            (ToolCategory::Message, RateLimit::new(50, 60_000)),
        ]);
        Self {
            max_concurrent_tasks: 5,
            category_limits,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputLimits {
    pub max_output_bytes: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: 50 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LockConfig {
    pub poll_interval_ms: u64,
    pub default_timeout_ms: u64,
    /// Lease length stamped on every grant; 0 disables expiry.
    pub lease_ttl_ms: u64,
    pub sweep_interval_ms: u64,
    pub notification_ttl_ms: u64,
}

impl LockConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            default_timeout_ms: 30_000,
            lease_ttl_ms: 5 * 60 * 1000,
            sweep_interval_ms: 30_000,
            notification_ttl_ms: 30_000,
        }
    }
}

/// Sizing of the warm pool in one region.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegionPoolConfig {
    pub base_pool: usize,
    pub max_pool: usize,
    pub scaling_factor: f64,
    pub templates: Vec<String>,
}

impl Default for RegionPoolConfig {
    fn default() -> Self {
        Self {
            base_pool: 10,
            max_pool: 50,
            scaling_factor: 1.5,
            templates: vec![
                "base".into(),
                "python".into(),
                "node".into(),
                "browser".into(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PoolSettings {
    /// Region served by this process.
    pub region: String,
    pub regions: HashMap<String, RegionPoolConfig>,
    /// Fraction of `base_pool` each template keeps warm.
    pub template_distribution: HashMap<String, f64>,
    pub container_lifetime_ms: u64,
    pub replenish_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    /// Replenish when warm count drops below this fraction of the target.
    pub low_watermark: f64,
    pub max_burst: usize,
}

impl PoolSettings {
    pub fn container_lifetime(&self) -> Duration {
        Duration::from_millis(self.container_lifetime_ms)
    }

    pub fn replenish_interval(&self) -> Duration {
        Duration::from_millis(self.replenish_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".into(),
            regions: HashMap::from([
                ("us-east-1".to_string(), RegionPoolConfig::default()),
                (
                    "eu-west-1".to_string(),
                    RegionPoolConfig {
                        base_pool: 5,
                        max_pool: 25,
                        ..Default::default()
                    },
                ),
            ]),
            template_distribution: HashMap::from([
                ("base".to_string(), 0.4),
                ("python".to_string(), 0.3),
                ("node".to_string(), 0.2),
                ("browser".to_string(), 0.1),
            ]),
            container_lifetime_ms: 10 * 60 * 1000,
            replenish_interval_ms: 5_000,
            cleanup_interval_ms: 30_000,
            low_watermark: 0.3,
            max_burst: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// "memory" or "sqlite".
    pub backend: String,
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            sqlite_path: "data/runtime.db".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub json_logs: bool,
    /// Prometheus listen address, e.g. "0.0.0.0:9000".
    pub metrics_addr: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("RUNTIME_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map RUNTIME__LOCKS__LEASE_TTL_MS=1000 to locks.lease_ttl_ms
            .add_source(Environment::with_prefix("RUNTIME").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_limits() {
        let config = AppConfig::default();
        assert_eq!(config.executor.default_timeout_ms, 30_000);
        assert_eq!(config.executor.max_output_bytes, 51_200);
        assert_eq!(config.safety.plan.max_steps, 50);
        assert_eq!(config.locks.poll_interval_ms, 500);
        assert_eq!(
            config.safety.execution.limit_for(ToolCategory::Shell),
            RateLimit::new(10, 60_000)
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            [locks]
            lease_ttl_ms = 1000

            [safety.execution.category_limits.shell]
            requests = 3
            window_ms = 1000
        "#;
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.locks.lease_ttl_ms, 1000);
        assert_eq!(config.locks.poll_interval_ms, 500);
        assert_eq!(
            config.safety.execution.limit_for(ToolCategory::Shell),
            RateLimit::new(3, 1000)
        );
    }
}
