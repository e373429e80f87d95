//! Anthropic provider implementation.
//!
//! Talks to the Anthropic Messages API and projects replies onto the
//! unified response shape. Transient failures (rate limits, 5xx, transport
//! errors) are retried with exponential backoff.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::ProviderError;
use crate::provider::types::{
    AiProvider, AiRequest, AiResponse, ModelSpec, ResponseMetadata, TokenUsage,
};

/// Default Anthropic API endpoint.
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// API version header required by the Messages API.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model to use if none specified.
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Maximum number of retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    /// HTTP client for making API requests.
    client: Client,
    /// API key for authentication. May be empty; `validate_config` reports
    /// that instead of failing construction.
    api_key: String,
    /// Base URL for the API.
    base_url: String,
    /// Default model to use when none is specified.
    default_model: String,
    /// Models this provider serves.
    models: Vec<ModelSpec>,
}

impl AnthropicProvider {
    /// Creates a provider with the given API key and default settings.
    pub fn new(api_key: String) -> Self {
        Self::with_config(api_key, ANTHROPIC_BASE_URL.to_string(), DEFAULT_MODEL.to_string())
    }

    /// Creates a provider with a custom base URL and default model.
    ///
    /// Useful for testing or API-compatible proxies.
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

    /// Get the API key (for debugging, returns masked value).
    pub fn api_key_masked(&self) -> String {
        if self.api_key.len() <= 8 {
            "*".repeat(self.api_key.len())
        } else {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        }
    }

    fn model_table() -> Vec<ModelSpec> {
        vec![
            ModelSpec::new("claude-opus-4-5", 200_000, 64_000)
                .with_pricing(5.0, 25.0)
                .with_quality(0.97),
            ModelSpec::new("claude-sonnet-4-5", 200_000, 64_000)
                .with_pricing(3.0, 15.0)
                .with_quality(0.9),
            ModelSpec::new("claude-haiku-4-5", 200_000, 64_000)
                .with_pricing(1.0, 5.0)
                .with_quality(0.75),
        ]
    }

    /// Execute a request with exponential backoff retry logic.
    ///
    /// Returns the parsed response and the number of retries spent.
    async fn execute_with_retry(
        &self,
        body: &MessagesRequest,
    ) -> Result<(MessagesResponse, u32), ProviderError> {
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
                        "Anthropic request failed, retrying"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::RequestFailed("retries exhausted".to_string())))
    }

    async fn execute_once(&self, body: &MessagesRequest) -> Result<MessagesResponse, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
            .json::<MessagesResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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

        let body = MessagesRequest {
            model: model.to_string(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
            system: request
                .context
                .as_ref()
                .and_then(|c| c.as_str())
                .map(str::to_string),
            messages: vec![WireMessage {
                role: "user",
                content: request.prompt.clone(),
            }],
        };

        let (reply, retries) = self.execute_with_retry(&body).await?;

        let content: String = reply
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();

        let usage = TokenUsage::new(reply.usage.input_tokens, reply.usage.output_tokens);
        let mut response = AiResponse::new(reply.id.clone(), self.name(), reply.model, content)
            .with_metadata(ResponseMetadata {
                stop_reason: reply.stop_reason,
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

/// Wire request for the Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// Wire response from the Messages API.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    model: String,
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}
