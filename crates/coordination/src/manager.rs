//! Exclusive resource locks with deadlock avoidance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use agent_runtime_core::{
    config::LockConfig,
    events::{EventEnvelope, EventSeverity, EventType, LockPayload},
    traits::{
        AgentMessage, AgentMessenger, EventEmitter, LockEventStore, MessagePriority, NoOpEventEmitter,
        ResourceLocker,
    },
    types::{LockAcquisition, LockAction, LockEvent, LockInfo, LockRefusal, WaitForEdge},
};
use agent_runtime_governance::metrics::{
    track_deadlock_prevented, track_deadlock_victim, track_lock_acquisition,
};

use crate::graph::WaitForGraph;

/// Static preemption priority of an agent role. Lower loses.
pub fn role_priority(role: &str) -> u32 {
    match role {
        "orchestrator" => 100,
        "planner" => 80,
        "coordinator" => 70,
        "researcher" => 60,
        "coder" => 50,
        "reviewer" => 40,
        "executor" => 30,
        "browser" => 20,
        "writer" => 10,
        _ => 0,
    }
}

/// Role prefix of an agent id: `coder-2` is a `coder`.
pub fn role_from_id(agent_id: &str) -> String {
    agent_id
        .split(['-', '_', ':', '.'])
        .next()
        .unwrap_or(agent_id)
        .to_lowercase()
}

enum Grant {
    Acquired { expired: Option<LockInfo> },
    Reentrant,
    HeldBy(String),
}

/// Grants one exclusive holder per named resource and refuses any wait that
/// would close a cycle in the wait-for graph.
///
/// Lock state is in memory. Every state change is also appended to the
/// optional [`LockEventStore`]; a failed append is logged and never undoes
/// the in-memory decision.
pub struct LockManager {
    config: LockConfig,
    locks: DashMap<String, LockInfo>,
    graph: Mutex<WaitForGraph>,
    /// `(agent, resource)` waits cut short by `force_release`.
    preempted: DashSet<(String, String)>,
    roles: DashMap<String, String>,
    store: Option<Arc<dyn LockEventStore>>,
    messenger: Option<Arc<dyn AgentMessenger>>,
    events: Arc<dyn EventEmitter>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
            graph: Mutex::new(WaitForGraph::new()),
            preempted: DashSet::new(),
            roles: DashMap::new(),
            store: None,
            messenger: None,
            events: Arc::new(NoOpEventEmitter),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn LockEventStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn AgentMessenger>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Override the role derived from the agent id.
    pub fn register_role(&self, agent_id: impl Into<String>, role: impl Into<String>) {
        self.roles.insert(agent_id.into(), role.into());
    }

    pub fn role_of(&self, agent_id: &str) -> String {
        self.roles
            .get(agent_id)
            .map(|r| r.clone())
            .unwrap_or_else(|| role_from_id(agent_id))
    }

    pub fn priority_of(&self, agent_id: &str) -> u32 {
        role_priority(&self.role_of(agent_id))
    }

    fn graph(&self) -> MutexGuard<'_, WaitForGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lease_end(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.config.lease_ttl_ms > 0)
            .then(|| now + chrono::Duration::milliseconds(self.config.lease_ttl_ms as i64))
    }

    fn try_grant(&self, agent: &str, resource: &str) -> Grant {
        let now = Utc::now();
        let fresh = LockInfo {
            resource: resource.to_string(),
            holder: agent.to_string(),
            acquired_at: now,
            expires_at: self.lease_end(now),
        };
        match self.locks.entry(resource.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Grant::Acquired { expired: None }
            }
            Entry::Occupied(mut slot) => {
                if slot.get().holder == agent {
                    slot.get_mut().expires_at = fresh.expires_at;
                    Grant::Reentrant
                } else if slot.get().is_expired(now) {
                    let old = slot.insert(fresh);
                    Grant::Acquired { expired: Some(old) }
                } else {
                    Grant::HeldBy(slot.get().holder.clone())
                }
            }
        }
    }

    /// Acquire `resource` for `agent`, waiting up to `timeout`.
    pub async fn acquire_lock(&self, agent: &str, resource: &str, timeout: Duration) -> LockAcquisition {
        self.acquire_lock_with_cancel(agent, resource, timeout, CancellationToken::new())
            .await
    }

    /// As [`acquire_lock`](Self::acquire_lock), returning early with
    /// [`LockRefusal::Cancelled`] once `cancel` fires.
    pub async fn acquire_lock_with_cancel(
        &self,
        agent: &str,
        resource: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> LockAcquisition {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut waiting_on: Option<String> = None;
        let wait_key = (agent.to_string(), resource.to_string());

        let outcome = loop {
            let holder = match self.try_grant(agent, resource) {
                Grant::Acquired { expired } => {
                    if let Some(old) = expired {
                        self.record_expired(&old).await;
                    }
                    let waited_ms = started.elapsed().as_millis() as u64;
                    self.record_grant(agent, resource, waited_ms).await;
                    break LockAcquisition::granted(waited_ms);
                }
                Grant::Reentrant => break LockAcquisition::granted(started.elapsed().as_millis() as u64),
                Grant::HeldBy(holder) => holder,
            };

            if let Some(ref current) = waiting_on {
                if self.preempted.remove(&wait_key).is_some() {
                    break LockAcquisition::refused(
                        LockRefusal::Preempted,
                        Some(holder),
                        started.elapsed().as_millis() as u64,
                    );
                }
                // An edge dropped because the holder was force-released is
                // re-added below against the new holder.
                if *current == holder && self.graph().has_edge(agent, resource) {
                    let now = Instant::now();
                    if now >= deadline {
                        break LockAcquisition::refused(
                            LockRefusal::Timeout,
                            Some(holder),
                            started.elapsed().as_millis() as u64,
                        );
                    }
                    let nap = self.config.poll_interval().min(deadline - now);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            break LockAcquisition::refused(
                                LockRefusal::Cancelled,
                                Some(holder),
                                started.elapsed().as_millis() as u64,
                            );
                        }
                        _ = tokio::time::sleep(nap) => continue,
                    }
                }
            }

            // New wait, or the resource changed hands while we waited.
            let deadlock = {
                let mut graph = self.graph();
                graph.remove_edge(agent, resource);
                if graph.would_deadlock(agent, &holder) {
                    true
                } else {
                    graph.add_edge(WaitForEdge {
                        waiting: agent.to_string(),
                        waiting_for: holder.clone(),
                        resource: resource.to_string(),
                        since: Utc::now(),
                    });
                    false
                }
            };
            if deadlock {
                break self.refuse_deadlock(agent, resource, holder, started).await;
            }
            tracing::debug!(agent, resource, holder = %holder, "Waiting for lock");
            waiting_on = Some(holder);
        };

        if waiting_on.is_some() {
            self.graph().remove_edge(agent, resource);
            self.preempted.remove(&wait_key);
        }
        track_lock_acquisition(outcome.acquired, outcome.waited_ms as f64 / 1000.0);
        if let Some(refusal) = outcome.refusal {
            tracing::info!(agent, resource, ?refusal, holder = ?outcome.holder, "Lock not acquired");
        }
        outcome
    }

    async fn refuse_deadlock(
        &self,
        agent: &str,
        resource: &str,
        holder: String,
        started: Instant,
    ) -> LockAcquisition {
        track_deadlock_prevented();
        tracing::warn!(agent, resource, holder = %holder, "Refusing lock: waiting would deadlock");
        self.emit(
            EventType::DeadlockPrevented,
            EventSeverity::Warning,
            agent,
            LockPayload {
                resource: resource.to_string(),
                holder: Some(holder.clone()),
                waited_ms: None,
            },
        )
        .await;
        LockAcquisition::refused(
            LockRefusal::WouldDeadlock,
            Some(holder),
            started.elapsed().as_millis() as u64,
        )
    }

    async fn record_grant(&self, agent: &str, resource: &str, waited_ms: u64) {
        let expires_at = self.locks.get(resource).and_then(|l| l.expires_at);
        self.persist(LockEvent::new(LockAction::Acquire, resource, agent).with_expiry(expires_at))
            .await;
        self.emit(
            EventType::LockAcquired,
            EventSeverity::Debug,
            agent,
            LockPayload {
                resource: resource.to_string(),
                holder: Some(agent.to_string()),
                waited_ms: Some(waited_ms),
            },
        )
        .await;
    }

    async fn record_expired(&self, lock: &LockInfo) {
        tracing::info!(resource = %lock.resource, holder = %lock.holder, "Lock lease expired");
        self.persist(LockEvent::new(LockAction::Expire, &lock.resource, &lock.holder))
            .await;
        self.emit(
            EventType::LockExpired,
            EventSeverity::Info,
            &lock.holder,
            LockPayload {
                resource: lock.resource.clone(),
                holder: Some(lock.holder.clone()),
                waited_ms: None,
            },
        )
        .await;
    }

    /// Release `resource` if `agent` holds it. Anyone else gets `false`.
    pub async fn release_lock(&self, agent: &str, resource: &str) -> bool {
        if self.locks.remove_if(resource, |_, l| l.holder == agent).is_none() {
            let holder = self.locks.get(resource).map(|l| l.holder.clone());
            tracing::warn!(agent, resource, holder = ?holder, "Release by non-holder ignored");
            return false;
        }
        self.persist(LockEvent::new(LockAction::Release, resource, agent))
            .await;
        self.emit(
            EventType::LockReleased,
            EventSeverity::Debug,
            agent,
            LockPayload {
                resource: resource.to_string(),
                holder: None,
                waited_ms: None,
            },
        )
        .await;
        true
    }

    /// Drop every lock `agent` holds and every wait-for edge touching it.
    /// Pending acquires by `agent` end with [`LockRefusal::Preempted`]; other
    /// agents that were waiting on it keep waiting for whoever holds the
    /// resource next. Returns the released resources.
    pub async fn force_release(&self, agent: &str) -> Vec<String> {
        let mut released = Vec::new();
        self.locks.retain(|resource, lock| {
            if lock.holder == agent {
                released.push(resource.clone());
                false
            } else {
                true
            }
        });
        released.sort();
        let edges = {
            let mut graph = self.graph();
            for edge in graph.edges().iter().filter(|e| e.waiting == agent) {
                self.preempted
                    .insert((edge.waiting.clone(), edge.resource.clone()));
            }
            graph.remove_agent(agent)
        };
        tracing::warn!(agent, locks = released.len(), edges, "Force-released agent");

        for resource in &released {
            self.persist(LockEvent::new(LockAction::ForceRelease, resource, agent))
                .await;
        }
        released
    }

    /// Break `cycle` by preempting its lowest-priority member. Ties go to
    /// the lexicographically last id. Returns the victim.
    pub async fn resolve_deadlock(&self, cycle: &[String]) -> Option<String> {
        let victim = cycle
            .iter()
            .min_by(|a, b| {
                self.priority_of(a)
                    .cmp(&self.priority_of(b))
                    .then_with(|| b.cmp(a))
            })?
            .clone();

        let released = self.force_release(&victim).await;
        track_deadlock_victim();
        self.emit_json(
            EventType::DeadlockResolved,
            EventSeverity::Critical,
            &victim,
            json!({ "victim": victim, "cycle": cycle, "released": released }),
        )
        .await;

        if let Some(ref messenger) = self.messenger {
            let message = AgentMessage::new(json!({
                "action": "preempted",
                "reason": "deadlock_resolution",
                "cycle": cycle,
            }))
            .with_priority(MessagePriority::Critical)
            .with_ttl_ms(self.config.notification_ttl_ms);
            if let Err(e) = messenger
                .send_to_agent(&victim, &self.role_of(&victim), message)
                .await
            {
                tracing::warn!(victim = %victim, error = %e, "Failed to notify deadlock victim");
            }
        }
        Some(victim)
    }

    /// Drop every lease that has run out by `now`.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<LockInfo> {
        let mut expired = Vec::new();
        self.locks.retain(|_, lock| {
            if lock.is_expired(now) {
                expired.push(lock.clone());
                false
            } else {
                true
            }
        });
        for lock in &expired {
            self.record_expired(lock).await;
        }
        expired
    }

    pub fn lock_status(&self, resource: &str) -> Option<LockInfo> {
        self.locks.get(resource).map(|l| l.clone())
    }

    pub fn locks_held_by(&self, agent: &str) -> Vec<String> {
        let mut held: Vec<String> = self
            .locks
            .iter()
            .filter(|l| l.holder == agent)
            .map(|l| l.key().clone())
            .collect();
        held.sort();
        held
    }

    pub fn wait_for_edges(&self) -> Vec<WaitForEdge> {
        self.graph().edges().to_vec()
    }

    /// Members of a wait-for cycle reachable from `agent`.
    pub fn find_cycle(&self, agent: &str) -> Option<Vec<String>> {
        self.graph().find_cycle(agent)
    }

    pub fn find_all_cycles(&self) -> Vec<Vec<String>> {
        self.graph().find_all_cycles()
    }

    async fn persist(&self, event: LockEvent) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.append_lock_event(event).await {
                tracing::warn!(error = %e, "Failed to persist lock event");
            }
        }
    }

    async fn emit(&self, event_type: EventType, severity: EventSeverity, actor: &str, payload: LockPayload) {
        self.emit_json(event_type, severity, actor, json!(payload)).await;
    }

    async fn emit_json(
        &self,
        event_type: EventType,
        severity: EventSeverity,
        actor: &str,
        payload: serde_json::Value,
    ) {
        self.events
            .emit(
                EventEnvelope::new(event_type, payload)
                    .with_actor(actor)
                    .with_severity(severity),
            )
            .await;
    }
}

#[async_trait]
impl ResourceLocker for LockManager {
    async fn acquire(&self, owner: &str, resource: &str, timeout: Duration) -> LockAcquisition {
        self.acquire_lock(owner, resource, timeout).await
    }

    async fn release(&self, owner: &str, resource: &str) -> bool {
        self.release_lock(owner, resource).await
    }
}
