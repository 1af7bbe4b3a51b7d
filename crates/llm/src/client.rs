use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, info, warn};

use crate::error::{LlmError, LlmResult};
use crate::source::{DecisionSource, ORCHESTRATOR_SYSTEM_PROMPT};
use crate::types::*;

const DEFAULT_MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 60000;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 500;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for OpenAI-compatible chat completion APIs (OpenAI, OpenRouter,
/// local gateways).
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: Some(DEFAULT_TEMPERATURE),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(api_key, OPENAI_BASE_URL, model)
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn with_retry<T, F, Fut>(&self, operation: F, operation_name: &str) -> LlmResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = LlmResult<T>>,
    {
        let max_backoff = Duration::from_millis(MAX_BACKOFF_MS);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    if retries >= self.max_retries {
                        error!(
                            "{} failed after {} retries: {}",
                            operation_name, retries, e
                        );
                        return Err(e);
                    }

                    let wait = match &e {
                        LlmError::RateLimited {
                            retry_after: Some(secs),
                        } => Duration::from_secs(*secs),
                        _ => backoff,
                    }
                    .min(max_backoff);

                    warn!(
                        "{} failed ({}), retrying in {}ms (attempt {}/{})",
                        operation_name,
                        e,
                        wait.as_millis(),
                        retries + 1,
                        self.max_retries
                    );

                    tokio::time::sleep(wait).await;
                    retries += 1;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(e) => {
                    if retries > 0 {
                        info!("{} failed after {} retries: {}", operation_name, retries, e);
                    }
                    return Err(e);
                }
            }
        }
    }

    pub async fn chat_completion(&self, messages: Vec<ChatMessage>) -> LlmResult<String> {
        self.with_retry(
            || async { self.chat_completion_inner(messages.clone()).await },
            "chat_completion",
        )
        .await
    }

    async fn chat_completion_inner(&self, messages: Vec<ChatMessage>) -> LlmResult<String> {
        debug!(
            "Creating chat completion with {} messages, model {}",
            messages.len(),
            self.model
        );

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: Some(false),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                warn!("Rate limited by decision source");
                return Err(LlmError::RateLimited { retry_after });
            }

            if let Ok(error_resp) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                error!(
                    "Chat API error: {} (type: {:?})",
                    error_resp.error.message, error_resp.error.error_type
                );
                return Err(LlmError::api(error_resp.error.message, Some(status.as_u16())));
            }

            return Err(LlmError::api(error_text, Some(status.as_u16())));
        }

        let chat_response: ChatCompletionResponse = response.json().await?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or(LlmError::EmptyResponse)?;

        debug!(response = %content, "Chat completion received");
        Ok(content)
    }
}

#[async_trait]
impl DecisionSource for ChatClient {
    async fn send(&self, prompt: &str) -> LlmResult<String> {
        self.chat_completion(vec![
            ChatMessage::system(ORCHESTRATOR_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })
    }

    fn client_for(server: &MockServer) -> ChatClient {
        ChatClient::new("test-key", server.uri(), "gpt-4o-mini")
            .with_initial_backoff(Duration::from_millis(5))
    }

    #[test]
    fn test_client_creation() {
        let client = ChatClient::new("test-key", "https://openrouter.ai/api/v1/", "model-x");
        assert_eq!(client.api_key, "test-key");
        assert_eq!(client.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(client.model(), "model-x");
    }

    #[tokio::test]
    async fn test_send_returns_trimmed_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "  {\"phase\": \"passive\", \"params\": {}, \"reason\": \"start\"}\n",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client_for(&server).send("what next?").await.unwrap();
        assert_eq!(reply, r#"{"phase": "passive", "params": {}, "reason": "start"}"#);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&server)
            .await;

        let reply = client_for(&server).send("next?").await.unwrap();
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "invalid api key", "type": "auth_error"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).send("next?").await.unwrap_err();
        match err {
            LlmError::Api {
                message,
                status_code,
            } => {
                assert_eq!(message, "invalid api key");
                assert_eq!(status_code, Some(401));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client_for(&server).send("next?").await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }
}
