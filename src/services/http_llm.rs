// src/services/http_llm.rs
//
// HTTP-backed LLM client. Posts the model-family-specific request body to a
// single inference endpoint with the model id alongside, the way a managed
// inference runtime is invoked. The endpoint returns the raw model response
// body as JSON.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{LlmClient, LlmError};

pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLlmClient {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn invoke(&self, model_id: &str, request: Value) -> Result<Value, LlmError> {
        debug!(model_id, "Invoking model");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "modelId": model_id,
                "body": request,
            }))
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::BadResponse(format!(
                "status {}: {}",
                status, detail
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LlmError::BadResponse(e.to_string()))
    }
}
