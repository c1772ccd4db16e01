//! Execution delegate: the remote evaluator invoked once per claimed job.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::types::Job;

/// Request body sent to the evaluator. Absent optionals are omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRequest {
    pub service_id: String,
    pub current_config: serde_json::Value,
    pub proposed_config: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_version_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl From<&Job> for EvaluationRequest {
    fn from(job: &Job) -> Self {
        Self {
            service_id: job.service_id.clone(),
            current_config: job.current_config.clone(),
            proposed_config: job.proposed_config.clone(),
            llm_provider: job.llm_provider.clone(),
            prompt_version_id: job.prompt_version_id,
            context: job.context.clone(),
            options: job.options.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DelegateError {
    #[error("advisor request failed: {0}")]
    Transport(String),
    #[error("advisor timed out after {0:?}")]
    Timeout(Duration),
    #[error("advisor returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("advisor returned an unreadable body: {0}")]
    InvalidBody(String),
}

/// Produces an evaluation result for one job.
#[async_trait]
pub trait ExecutionDelegate: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest)
    -> Result<serde_json::Value, DelegateError>;
}

#[async_trait]
impl<D: ExecutionDelegate + ?Sized> ExecutionDelegate for std::sync::Arc<D> {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<serde_json::Value, DelegateError> {
        (**self).evaluate(request).await
    }
}

/// Calls `POST {base_url}/api/v1/evaluate`.
#[derive(Debug, Clone)]
pub struct HttpExecutionDelegate {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpExecutionDelegate {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(base_url: &str) -> Result<Self, DelegateError> {
        Self::with_timeout(base_url, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, DelegateError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DelegateError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/v1/evaluate", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ExecutionDelegate for HttpExecutionDelegate {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<serde_json::Value, DelegateError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DelegateError::Timeout(self.timeout)
                } else {
                    DelegateError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DelegateError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| DelegateError::InvalidBody(e.to_string()))
    }
}
