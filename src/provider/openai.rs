//! OpenAI provider implementation.
//!
//! Talks to the Chat Completions API. Same retry and projection behavior as
//! the Anthropic provider, different wire shapes.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::ProviderError;
use crate::provider::types::{
    AiProvider, AiRequest, AiResponse, ModelSpec, ResponseMetadata, TokenUsage,
};

/// Default OpenAI API endpoint.
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Default model to use if none specified.
const DEFAULT_MODEL: &str = "gpt-4o";

/// Maximum number of retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenAI Chat Completions provider.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    models: Vec<ModelSpec>,
}

impl OpenAiProvider {
    /// Creates a provider with the given API key and default settings.
    pub fn new(api_key: String) -> Self {
        Self::with_config(api_key, OPENAI_BASE_URL.to_string(), DEFAULT_MODEL.to_string())
    }

    /// Creates a provider with a custom base URL and default model.
    pub fn with_config(api_key: String, base_url: String, default_model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            api_key,
            base_url,
            default_model,
            models: Self::model_table(),
        }
    }

    fn model_table() -> Vec<ModelSpec> {
        vec![
            ModelSpec::new("gpt-4o", 128_000, 16_384)
                .with_pricing(2.5, 10.0)
                .with_quality(0.85),
            ModelSpec::new("gpt-4o-mini", 128_000, 16_384)
                .with_pricing(0.15, 0.6)
                .with_quality(0.7),
            ModelSpec::new("o3-mini", 200_000, 100_000)
                .with_pricing(1.1, 4.4)
                .with_quality(0.88),
        ]
    }

    async fn execute_with_retry(
        &self,
        body: &CompletionsRequest,
    ) -> Result<(CompletionsResponse, u32), ProviderError> {
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_RETRY_DELAY_MS * 2u64.pow(attempt - 1);
                let jitter = {
                    use rand::RngExt;
                    rand::rng().random_range(0..=delay / 2)
                };
                tokio::time::sleep(Duration::from_millis(delay + jitter)).await;
            }

            match self.execute_once(body).await {
                Ok(response) => return Ok((response, attempt)),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "OpenAI request failed, retrying"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::RequestFailed("retries exhausted".to_string())))
    }

    async fn execute_once(
        &self,
        body: &CompletionsRequest,
    ) -> Result<CompletionsResponse, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::RateLimited(message));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                code: status.as_u16(),
                message,
            });
        }

        response
            .json::<CompletionsResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn send_request(&self, request: &AiRequest) -> Result<AiResponse, ProviderError> {
        let settings = self.validate_request(request)?;
        let model = request.model.as_deref().unwrap_or(&self.default_model);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.context.as_ref().and_then(|c| c.as_str()) {
            messages.push(WireMessage {
                role: "system",
                content: system.to_string(),
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        let body = CompletionsRequest {
            model: model.to_string(),
            messages,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
        };

        let (reply, retries) = self.execute_with_retry(&body).await?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response contained no choices".to_string()))?;

        let usage = TokenUsage::new(reply.usage.prompt_tokens, reply.usage.completion_tokens);
        let mut response = AiResponse::new(
            reply.id.clone(),
            self.name(),
            reply.model,
            choice.message.content,
        )
        .with_metadata(ResponseMetadata {
            stop_reason: choice.finish_reason,
            token_usage: Some(usage),
            provider_id: Some(reply.id),
        });
        response.performance.retry_count = retries;

        Ok(response)
    }

    fn validate_config(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Wire request for the Chat Completions API.
#[derive(Debug, Serialize)]
struct CompletionsRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// Wire response from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct CompletionsResponse {
    id: String,
    model: String,
    choices: Vec<WireChoice>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireReplyMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_config_requires_api_key() {
        assert!(OpenAiProvider::new("sk-test".to_string()).validate_config());
        assert!(!OpenAiProvider::new(String::new()).validate_config());
    }

    #[test]
    fn test_model_table() {
        let provider = OpenAiProvider::new("key".to_string());

        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.default_model(), "gpt-4o");
        assert!(provider.find_model("gpt-4o-mini").is_some());
        assert!(provider.find_model("claude-sonnet-4-5").is_none());
    }

    #[test]
    fn test_wire_response_parses() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }"#;

        let reply: CompletionsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(reply.choices[0].message.content, "hi there");
        assert_eq!(reply.usage.completion_tokens, 3);
    }
}
