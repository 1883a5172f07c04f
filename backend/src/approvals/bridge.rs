// Durable Workflow Bridge - Completes suspended activities on the external engine

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::DurableEngineConfig;
use crate::error::{AutomationError, AutomationResult};

/// Output handed to the durable engine when a suspended activity completes.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActivityCompletion {
    pub action_name: String,
    pub result: Value,
    pub success: bool,
}

/// Completes one suspended durable activity. The token is passed through untouched.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AsyncCompleter: Send + Sync {
    async fn complete(&self, token: &str, completion: &ActivityCompletion) -> AutomationResult<()>;
}

#[derive(Debug, Serialize)]
struct CompletePayload<'a> {
    token: &'a str,
    action_name: &'a str,
    result: &'a Value,
    success: bool,
}

/// HTTP adapter for the durable engine's activity completion endpoint.
pub struct HttpCompleter {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpCompleter {
    pub fn new(config: &DurableEngineConfig) -> AutomationResult<Self> {
        Self::with_timeout(&config.base_url, config.timeout(), config.api_token.clone())
    }

    pub fn with_timeout(
        base_url: &str,
        timeout: Duration,
        api_token: Option<String>,
    ) -> AutomationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AutomationError::execution("durable_engine", base_url, e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/activities/complete", self.base_url)
    }
}

#[async_trait]
impl AsyncCompleter for HttpCompleter {
    async fn complete(&self, token: &str, completion: &ActivityCompletion) -> AutomationResult<()> {
        let endpoint = self.endpoint();
        let payload = CompletePayload {
            token,
            action_name: &completion.action_name,
            result: &completion.result,
            success: completion.success,
        };

        let mut request = self.client.post(&endpoint).json(&payload);
        if let Some(api_token) = &self.api_token {
            request = request.bearer_auth(api_token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AutomationError::execution("durable_engine", &endpoint, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AutomationError::execution(
                "durable_engine",
                &endpoint,
                format!("Status: {}, Body: {}", status, body),
            ))
        }
    }
}
