//! Warm sandbox pool.
//!
//! Keeps a per-template stock of pre-initialized containers so a task can
//! start without paying container boot time. Acquisition never waits for
//! stock: anything short of a clean warm claim falls back to a cold start.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use agent_runtime_core::{
    config::{PoolSettings, RegionPoolConfig},
    events::{EventEnvelope, EventSeverity, EventType, SandboxPayload},
    traits::{ContainerStore, EventEmitter, NoOpEventEmitter, SandboxProvider},
    types::{ContainerAcquisition, ContainerQuery, ContainerRecord, ContainerStatus, ContainerUpdate},
    Error, Result,
};
use agent_runtime_governance::metrics::{track_pool_size, track_sandbox_acquisition};

use crate::stats::{PoolStats, TemplateStats};

enum WarmClaim {
    Claimed(ContainerRecord),
    Empty,
    LostRace,
    /// The region keeps no stock of this template.
    Unsupported,
}

#[derive(Default)]
struct Counters {
    acquisitions: AtomicU64,
    warm_hits: AtomicU64,
    cold_starts: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Containers created per template by one replenishment tick.
pub type ReplenishReport = BTreeMap<String, usize>;

pub struct WarmPoolManager {
    settings: PoolSettings,
    region: RegionPoolConfig,
    store: Arc<dyn ContainerStore>,
    events: Arc<dyn EventEmitter>,
    counters: Counters,
}

impl WarmPoolManager {
    pub fn new(settings: PoolSettings, store: Arc<dyn ContainerStore>) -> Self {
        let region = match settings.regions.get(&settings.region) {
            Some(region) => region.clone(),
            None => {
                tracing::warn!(region = %settings.region, "No pool sizing for region, using defaults");
                RegionPoolConfig::default()
            }
        };
        Self {
            settings,
            region,
            store,
            events: Arc::new(NoOpEventEmitter),
            counters: Counters::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = events;
        self
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn region(&self) -> &str {
        &self.settings.region
    }

    pub fn supports(&self, template: &str) -> bool {
        self.region.templates.iter().any(|t| t == template)
    }

    /// Warm stock to keep for `template`: `ceil(base_pool * fraction)`.
    pub fn target_for(&self, template: &str) -> usize {
        let fraction = self
            .settings
            .template_distribution
            .get(template)
            .copied()
            .unwrap_or(0.0);
        (self.region.base_pool as f64 * fraction).ceil() as usize
    }

    fn lifetime(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.settings.container_lifetime_ms as i64)
    }

    fn query(&self, template: Option<&str>, status: Option<ContainerStatus>) -> ContainerQuery {
        ContainerQuery {
            region: Some(self.settings.region.clone()),
            template: template.map(str::to_string),
            status,
            limit: None,
        }
    }

    /// Hand out a container for `task_id`, warm if one is in stock.
    pub async fn acquire_container(
        &self,
        template: &str,
        user_id: &str,
        task_id: &str,
    ) -> Result<ContainerAcquisition> {
        let started = Instant::now();
        self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);

        let claim = if self.supports(template) {
            self.claim_warm(template, user_id, task_id).await
        } else {
            tracing::warn!(template, region = %self.settings.region, "Template is not pooled in this region");
            Ok(WarmClaim::Unsupported)
        };
        let fallback = match claim {
            Ok(WarmClaim::Claimed(container)) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.counters.warm_hits.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .total_latency_ms
                    .fetch_add(latency_ms, Ordering::Relaxed);
                track_sandbox_acquisition(template, true, latency_ms as f64);
                tracing::debug!(container_id = %container.id, template, task_id, latency_ms, "Warm container claimed");
                self.emit(EventType::SandboxWarmHit, task_id, &container, Some(latency_ms), None)
                    .await;
                return Ok(ContainerAcquisition {
                    container,
                    was_warm: true,
                    latency_ms,
                    fallback_reason: None,
                });
            }
            Ok(WarmClaim::Unsupported) => "unsupported template".to_string(),
            Ok(WarmClaim::Empty) => "no warm container available".to_string(),
            Ok(WarmClaim::LostRace) => "warm container claimed concurrently".to_string(),
            Err(e) => {
                tracing::warn!(template, error = %e, "Warm container lookup failed");
                format!("warm lookup failed: {}", e)
            }
        };

        let container = self.cold_start(template, user_id, task_id).await?;
        let latency_ms = started.elapsed().as_millis() as u64;
        self.counters.cold_starts.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        track_sandbox_acquisition(template, false, latency_ms as f64);
        tracing::info!(container_id = %container.id, template, task_id, reason = %fallback, "Cold-started container");
        self.emit(
            EventType::SandboxColdStart,
            task_id,
            &container,
            Some(latency_ms),
            Some(fallback.clone()),
        )
        .await;
        Ok(ContainerAcquisition {
            container,
            was_warm: false,
            latency_ms,
            fallback_reason: Some(fallback),
        })
    }

    async fn claim_warm(&self, template: &str, user_id: &str, task_id: &str) -> Result<WarmClaim> {
        let now = Utc::now();
        let candidates = self
            .store
            .find_containers(&self.query(Some(template), Some(ContainerStatus::Warm)))
            .await?;
        let Some(mut candidate) = candidates.into_iter().find(|c| !c.is_expired(now)) else {
            return Ok(WarmClaim::Empty);
        };

        let update = ContainerUpdate {
            assigned_at: Some(now),
            user_id: Some(user_id.to_string()),
            task_id: Some(task_id.to_string()),
            ..ContainerUpdate::status(ContainerStatus::Assigned)
        };
        if !self
            .store
            .update_container_if(&candidate.id, ContainerStatus::Warm, update.clone())
            .await?
        {
            return Ok(WarmClaim::LostRace);
        }
        update.apply(&mut candidate);
        Ok(WarmClaim::Claimed(candidate))
    }

    async fn cold_start(&self, template: &str, user_id: &str, task_id: &str) -> Result<ContainerRecord> {
        let now = Utc::now();
        let record = ContainerRecord {
            id: Uuid::new_v4().to_string(),
            template: template.to_string(),
            region: self.settings.region.clone(),
            status: ContainerStatus::Assigned,
            created_at: now,
            assigned_at: Some(now),
            released_at: None,
            expires_at: now + self.lifetime(),
            user_id: Some(user_id.to_string()),
            task_id: Some(task_id.to_string()),
            pre_initialized: false,
        };
        self.store.insert_container(record.clone()).await?;
        Ok(record)
    }

    /// Retire a container. It is never returned to the warm stock.
    pub async fn release_container(&self, container_id: &str) -> Result<()> {
        let Some(record) = self.store.get_container(container_id).await? else {
            return Err(Error::sandbox(format!("container {} not found", container_id)));
        };
        if !record.status.can_transition_to(ContainerStatus::Expired) {
            tracing::debug!(container_id, status = %record.status, "Container already retired");
            return Ok(());
        }

        let update = ContainerUpdate {
            released_at: Some(Utc::now()),
            ..ContainerUpdate::status(ContainerStatus::Expired)
        };
        if !self
            .store
            .update_container_if(container_id, record.status, update)
            .await?
        {
            tracing::debug!(container_id, "Container changed state during release");
            return Ok(());
        }
        let task = record.task_id.clone().unwrap_or_default();
        self.emit(EventType::SandboxReleased, &task, &record, None, None)
            .await;
        Ok(())
    }

    /// Top up every template whose warm stock fell below the low watermark.
    pub async fn replenish_once(&self) -> Result<ReplenishReport> {
        let now = Utc::now();
        let region_records = self.store.find_containers(&self.query(None, None)).await?;
        let mut live = region_records
            .iter()
            .filter(|c| c.status.is_live() && !c.is_expired(now))
            .count();

        let mut report = ReplenishReport::new();
        for template in &self.region.templates {
            let target = self.target_for(template);
            let warm = region_records
                .iter()
                .filter(|c| &c.template == template && c.status == ContainerStatus::Warm && !c.is_expired(now))
                .count();
            track_pool_size(&self.settings.region, template, warm);
            if target == 0 || (warm as f64) >= target as f64 * self.settings.low_watermark {
                continue;
            }

            let room = self.region.max_pool.saturating_sub(live);
            let wanted = (target - warm).min(self.settings.max_burst).min(room);
            if wanted == 0 {
                tracing::debug!(template, live, max_pool = self.region.max_pool, "Pool at capacity");
                continue;
            }

            let mut created = 0;
            for _ in 0..wanted {
                match self.warm_up(template).await {
                    Ok(()) => created += 1,
                    Err(e) => {
                        tracing::warn!(template, error = %e, "Failed to pre-create container");
                        break;
                    }
                }
            }
            live += created;
            if created > 0 {
                track_pool_size(&self.settings.region, template, warm + created);
                report.insert(template.clone(), created);
            }
        }

        if !report.is_empty() {
            tracing::info!(region = %self.settings.region, created = ?report, "Replenished warm pool");
            self.events
                .emit(EventEnvelope::new(
                    EventType::PoolReplenished,
                    json!({ "region": self.settings.region, "created": report }),
                ))
                .await;
        }
        Ok(report)
    }

    async fn warm_up(&self, template: &str) -> Result<()> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        self.store
            .insert_container(ContainerRecord {
                id: id.clone(),
                template: template.to_string(),
                region: self.settings.region.clone(),
                status: ContainerStatus::Warming,
                created_at: now,
                assigned_at: None,
                released_at: None,
                expires_at: now + self.lifetime(),
                user_id: None,
                task_id: None,
                pre_initialized: true,
            })
            .await?;
        self.store
            .update_container_if(
                &id,
                ContainerStatus::Warming,
                ContainerUpdate::status(ContainerStatus::Warm),
            )
            .await?;
        Ok(())
    }

    /// Delete every container whose lifetime ended by `now`.
    pub async fn cleanup_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.store.delete_expired(now).await?;
        if removed > 0 {
            tracing::info!(region = %self.settings.region, removed, "Cleaned up expired containers");
            self.events
                .emit(EventEnvelope::new(
                    EventType::PoolCleaned,
                    json!({ "region": self.settings.region, "removed": removed }),
                ))
                .await;
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        let records = self.store.find_containers(&self.query(None, None)).await?;
        let templates = self
            .region
            .templates
            .iter()
            .map(|template| {
                let count = |status: ContainerStatus| {
                    records
                        .iter()
                        .filter(|c| &c.template == template && c.status == status)
                        .count()
                };
                TemplateStats::new(
                    template,
                    count(ContainerStatus::Warm),
                    count(ContainerStatus::Assigned),
                    count(ContainerStatus::Expired),
                    self.target_for(template),
                )
            })
            .collect();

        Ok(PoolStats::new(
            &self.settings.region,
            templates,
            self.counters.acquisitions.load(Ordering::Relaxed),
            self.counters.warm_hits.load(Ordering::Relaxed),
            self.counters.cold_starts.load(Ordering::Relaxed),
            self.counters.total_latency_ms.load(Ordering::Relaxed),
        ))
    }

    async fn emit(
        &self,
        event_type: EventType,
        task_id: &str,
        container: &ContainerRecord,
        latency_ms: Option<u64>,
        reason: Option<String>,
    ) {
        let payload = SandboxPayload {
            container_id: container.id.clone(),
            template: container.template.clone(),
            region: container.region.clone(),
            latency_ms,
            reason,
        };
        let severity = match event_type {
            EventType::SandboxColdStart => EventSeverity::Warning,
            _ => EventSeverity::Info,
        };
        self.events
            .emit(
                EventEnvelope::new(event_type, json!(payload))
                    .with_task(task_id)
                    .with_severity(severity),
            )
            .await;
    }
}

#[async_trait]
impl SandboxProvider for WarmPoolManager {
    async fn acquire_sandbox(
        &self,
        template: &str,
        user_id: &str,
        task_id: &str,
    ) -> Result<ContainerAcquisition> {
        self.acquire_container(template, user_id, task_id).await
    }

    async fn release_sandbox(&self, container_id: &str) -> Result<()> {
        self.release_container(container_id).await
    }
}
