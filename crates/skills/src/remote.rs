//! HTTP client for the hosted execution backend.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use agent_runtime_core::{
    traits::{RemoteExecutor, RemoteTask},
    Error, Result,
};

/// Posts each [`RemoteTask`] as JSON to `<base>/execute` and returns the
/// response body.
pub struct HttpRemoteExecutor {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRemoteExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::invalid_request(format!("Invalid remote executor URL {}: {}", base_url, e)))?;
        let endpoint = base
            .join("execute")
            .map_err(|e| Error::invalid_request(format!("Invalid remote executor URL {}: {}", base_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteExecutor for HttpRemoteExecutor {
    async fn execute(&self, task: RemoteTask) -> Result<Value> {
        tracing::debug!(task_type = %task.task_type, endpoint = %self.endpoint, "Dispatching remote task");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&task)
            .send()
            .await
            .map_err(|e| Error::remote(format!("{} request failed: {}", task.task_type, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote(format!(
                "{} returned {}: {}",
                task.task_type,
                status,
                body.chars().take(512).collect::<String>()
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| Error::remote(format!("{} returned invalid JSON: {}", task.task_type, e)))
    }
}
