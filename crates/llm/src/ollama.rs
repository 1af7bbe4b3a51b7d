use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{LlmError, LlmResult};
use crate::source::{DecisionSource, ORCHESTRATOR_SYSTEM_PROMPT};
use crate::types::{GenerateOptions, GenerateRequest, GenerateResponse};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Low temperature keeps small local models close to the requested JSON shape.
const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Client for a local Ollama server's `/api/generate` endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> LlmResult<Self> {
        let client = Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, prompt: &str) -> LlmResult<String> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            system: ORCHESTRATOR_SYSTEM_PROMPT.to_string(),
            stream: false,
            options: GenerateOptions {
                temperature: DEFAULT_TEMPERATURE,
            },
            format: Some("json".to_string()),
        };

        let url = format!("{}/api/generate", self.endpoint);
        debug!(url = %url, model = %self.model, "Sending generate request");

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::api(body, Some(status.as_u16())));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)?;
        if let Some(error) = parsed.error.filter(|e| !e.is_empty()) {
            return Err(LlmError::api(format!("Ollama error: {error}"), None));
        }

        let text = parsed.response.trim().to_string();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        debug!(response = %text, "Ollama response received");
        Ok(text)
    }
}

#[async_trait]
impl DecisionSource for OllamaClient {
    async fn send(&self, prompt: &str) -> LlmResult<String> {
        self.generate(prompt).await
    }
}
