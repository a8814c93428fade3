//! In-process agent mailboxes.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use agent_runtime_core::{
    traits::{AgentMessage, AgentMessenger},
    Error, Result,
};

struct Queued {
    message: AgentMessage,
    role: String,
    arrived: Instant,
    seq: u64,
}

impl Queued {
    fn is_stale(&self, now: Instant) -> bool {
        self.message
            .ttl_ms
            .is_some_and(|ttl| now.duration_since(self.arrived) >= Duration::from_millis(ttl))
    }
}

/// One mailbox per registered agent. Reading drains the box, highest
/// priority first and then in arrival order; messages past their TTL are
/// discarded unread.
#[derive(Default)]
pub struct ChannelMessenger {
    mailboxes: DashMap<String, Vec<Queued>>,
    seq: std::sync::atomic::AtomicU64,
}

impl ChannelMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent_id: impl Into<String>) {
        self.mailboxes.entry(agent_id.into()).or_default();
    }

    pub fn unregister(&self, agent_id: &str) -> bool {
        self.mailboxes.remove(agent_id).is_some()
    }

    /// Drain `agent_id`'s mailbox. Returns `(role, message)` pairs.
    pub fn receive(&self, agent_id: &str) -> Result<Vec<(String, AgentMessage)>> {
        let mut mailbox = self
            .mailboxes
            .get_mut(agent_id)
            .ok_or_else(|| Error::messaging(format!("agent {} has no mailbox", agent_id)))?;
        let now = Instant::now();
        let mut queued: Vec<Queued> = std::mem::take(&mut *mailbox)
            .into_iter()
            .filter(|q| !q.is_stale(now))
            .collect();
        queued.sort_by(|a, b| b.message.priority.cmp(&a.message.priority).then(a.seq.cmp(&b.seq)));
        Ok(queued.into_iter().map(|q| (q.role, q.message)).collect())
    }

    pub fn pending(&self, agent_id: &str) -> usize {
        self.mailboxes.get(agent_id).map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AgentMessenger for ChannelMessenger {
    async fn send_to_agent(&self, agent_id: &str, role: &str, message: AgentMessage) -> Result<()> {
        let mut mailbox = self
            .mailboxes
            .get_mut(agent_id)
            .ok_or_else(|| Error::messaging(format!("agent {} has no mailbox", agent_id)))?;
        let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        mailbox.push(Queued {
            message,
            role: role.to_string(),
            arrived: Instant::now(),
            seq,
        });
        tracing::debug!(agent_id, role, "Queued agent message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_core::traits::MessagePriority;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_and_ttl() {
        let messenger = ChannelMessenger::new();
        messenger.register("coder-1");

        messenger
            .send_to_agent("coder-1", "coder", AgentMessage::new(json!({"n": 1})))
            .await
            .unwrap();
        messenger
            .send_to_agent(
                "coder-1",
                "coder",
                AgentMessage::new(json!({"n": 2})).with_priority(MessagePriority::Critical),
            )
            .await
            .unwrap();
        messenger
            .send_to_agent("coder-1", "coder", AgentMessage::new(json!({"n": 3})).with_ttl_ms(100))
            .await
            .unwrap();
        messenger
            .send_to_agent("coder-1", "coder", AgentMessage::new(json!({"n": 4})))
            .await
            .unwrap();
        assert_eq!(messenger.pending("coder-1"), 4);

        tokio::time::advance(Duration::from_millis(200)).await;
        let got: Vec<_> = messenger
            .receive("coder-1")
            .unwrap()
            .into_iter()
            .map(|(_, m)| m.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(got, [2, 1, 4]);
        assert_eq!(messenger.pending("coder-1"), 0);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_error() {
        let messenger = ChannelMessenger::new();
        let err = messenger
            .send_to_agent("ghost", "writer", AgentMessage::new(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Messaging(_)));
        assert!(messenger.receive("ghost").is_err());
    }
}
