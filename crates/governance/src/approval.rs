//! Human confirmation gates for risky tool calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};

use agent_runtime_core::{
    traits::ConfirmationHandler,
    types::{ConfirmationRequest, ConfirmationResponse, RiskLevel},
    Error, Result,
};

// =============================================================================
// Channel-Based Confirmation Gate
// =============================================================================

/// Publishes confirmation requests to listeners (a UI bridge, a CLI prompt)
/// and waits for a response submitted through [`submit_response`].
///
/// Requests below the risk threshold are approved without asking. A request
/// nobody answers is denied once the timeout passes.
///
/// [`submit_response`]: ChannelConfirmationGate::submit_response
pub struct ChannelConfirmationGate {
    threshold: RiskLevel,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ConfirmationResponse>>>>,
    request_tx: broadcast::Sender<ConfirmationRequest>,
    timeout: Duration,
}

impl ChannelConfirmationGate {
    pub fn new(threshold: RiskLevel) -> Self {
        let (request_tx, _) = broadcast::channel(32);
        Self {
            threshold,
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_tx,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Subscribe to new confirmation requests.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfirmationRequest> {
        self.request_tx.subscribe()
    }

    /// Deliver a human's answer to a pending request.
    pub async fn submit_response(&self, request_id: &str, response: ConfirmationResponse) -> Result<()> {
        let sender = self
            .pending
            .lock()
            .await
            .remove(request_id)
            .ok_or_else(|| Error::governance(format!("no pending confirmation with id {}", request_id)))?;
        sender
            .send(response)
            .map_err(|_| Error::governance("confirmation requester is gone (timed out?)"))
    }

    pub async fn list_pending(&self) -> Vec<String> {
        self.pending.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ConfirmationHandler for ChannelConfirmationGate {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<ConfirmationResponse> {
        if request.risk_level < self.threshold {
            return Ok(ConfirmationResponse::approved("BELOW_THRESHOLD"));
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(request.request_id.clone(), tx);

        // No subscribers is fine; the request will time out.
        let _ = self.request_tx.send(request.clone());

        let timeout = request
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);
        tracing::info!(
            request_id = %request.request_id,
            tool = %request.tool_name,
            risk = ?request.risk_level,
            timeout_ms = timeout.as_millis() as u64,
            "Waiting for confirmation"
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&request.request_id);
                Err(Error::governance("confirmation channel closed unexpectedly"))
            }
            Err(_) => {
                self.pending.lock().await.remove(&request.request_id);
                tracing::warn!(request_id = %request.request_id, "Confirmation timed out, denying");
                Ok(ConfirmationResponse::denied("confirmation timed out", "TIMEOUT"))
            }
        }
    }
}

// =============================================================================
// Auto-Approve Gate
// =============================================================================

/// Approves everything. Development and tests only.
pub struct AutoApproveGate;

#[async_trait]
impl ConfirmationHandler for AutoApproveGate {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<ConfirmationResponse> {
        tracing::warn!(
            tool = %request.tool_name,
            risk = ?request.risk_level,
            "AUTO-APPROVED (do not use in production)"
        );
        Ok(ConfirmationResponse::approved("AUTO_APPROVED"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runtime_core::types::AgentContext;
    use serde_json::json;

    fn request(risk: RiskLevel) -> ConfirmationRequest {
        let ctx = AgentContext::new("task-1", "alice");
        ConfirmationRequest::new(&ctx, "shell.exec", json!({"command": "rm -rf build"}), risk)
    }

    #[tokio::test]
    async fn test_auto_approve_gate() {
        let response = AutoApproveGate.confirm(&request(RiskLevel::Critical)).await.unwrap();
        assert!(response.is_approved());
    }

    #[tokio::test]
    async fn test_below_threshold_skips_prompt() {
        let gate = ChannelConfirmationGate::new(RiskLevel::High);
        let response = gate.confirm(&request(RiskLevel::Low)).await.unwrap();
        assert_eq!(response, ConfirmationResponse::approved("BELOW_THRESHOLD"));
        assert!(gate.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_submitted_denial_is_returned() {
        let gate = Arc::new(ChannelConfirmationGate::new(RiskLevel::Medium));
        let mut listener = gate.subscribe();

        let waiting = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.confirm(&request(RiskLevel::High)).await })
        };

        let published = listener.recv().await.unwrap();
        assert_eq!(published.tool_name, "shell.exec");
        gate.submit_response(
            &published.request_id,
            ConfirmationResponse::denied("too dangerous", "USER_DENIED"),
        )
        .await
        .unwrap();

        match waiting.await.unwrap().unwrap() {
            ConfirmationResponse::Denied { reason, .. } => assert_eq!(reason, "too dangerous"),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_auto_denies() {
        let gate = ChannelConfirmationGate::new(RiskLevel::Medium).with_timeout(Duration::from_secs(30));
        let response = gate.confirm(&request(RiskLevel::High)).await.unwrap();
        match response {
            ConfirmationResponse::Denied { reason_code, .. } => assert_eq!(reason_code, "TIMEOUT"),
            other => panic!("expected timeout denial, got {:?}", other),
        }
        assert!(gate.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_request_id() {
        let gate = ChannelConfirmationGate::new(RiskLevel::Low);
        assert!(gate
            .submit_response("missing", ConfirmationResponse::approved("USER_APPROVED"))
            .await
            .is_err());
    }
}
