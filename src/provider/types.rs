//! Request/response model and the provider capability contract.
//!
//! Every provider backend is projected onto the same shapes: an `AiRequest`
//! going in, a unified `AiResponse` coming out. Shared base behavior lives
//! here as provided trait methods and free functions: parameter
//! normalization with defaults, model-aware validation, and the character
//! heuristic for prompt length estimation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Default token budget applied when the caller supplies none.
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.1;

/// Default nucleus sampling parameter.
pub const DEFAULT_TOP_P: f64 = 0.99;

/// An AI request as accepted by the scheduling core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRequest {
    /// The prompt text. Must be non-empty after trimming.
    pub prompt: String,
    /// Provider to route to; the manager's default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model to use; the provider's default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Caller-supplied generation parameters, merged over defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<RequestParameters>,
    /// Opaque caller context carried alongside the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// Request type hint used by routing recommendations.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
}

impl AiRequest {
    /// Creates a request with only a prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            provider: None,
            model: None,
            parameters: None,
            context: None,
            request_type: None,
        }
    }

    /// Sets the target provider.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the target model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets generation parameters.
    pub fn with_parameters(mut self, parameters: RequestParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Sets the request type hint.
    pub fn with_request_type(mut self, request_type: impl Into<String>) -> Self {
        self.request_type = Some(request_type.into());
        self
    }
}

/// Caller-supplied generation parameters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RequestParameters {
    /// Maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl RequestParameters {
    /// Creates empty parameters (all defaults apply).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the max token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the nucleus sampling parameter.
    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }
}

/// Fully resolved generation settings after normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

/// Merges caller-supplied parameters over the shared defaults.
pub fn normalize_request(request: &AiRequest) -> GenerationSettings {
    let params = request.parameters.unwrap_or_default();
    GenerationSettings {
        max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: params.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        top_p: params.top_p.unwrap_or(DEFAULT_TOP_P),
    }
}

/// Estimate token count for a string.
/// Uses simple heuristic: ~4 characters per token for English text.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as f32 / 4.0).ceil() as u32
}

/// Token usage reported by a provider backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u32,
    /// Tokens generated in the response.
    pub output_tokens: u32,
    /// Input plus output.
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Creates a usage record; the total is derived.
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Backend-specific details projected onto the unified response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Why generation stopped (e.g., "end_turn", "max_tokens").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Token accounting for the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// The backend's own identifier for the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Timing and retry accounting for one dispatch.
///
/// Providers return these zero-initialized; the dispatch path fills them in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceInfo {
    /// Wall-clock time of the dispatch in milliseconds.
    pub response_time_ms: u64,
    /// Transport-level retries spent on the call.
    pub retry_count: u32,
}

/// Unified response shape returned by every provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    /// Response identifier (the backend's where available).
    pub id: String,
    /// Provider that produced the response.
    pub provider: String,
    /// Model that produced the response.
    pub model: String,
    /// Generated text.
    pub content: String,
    /// Backend-specific details.
    #[serde(default)]
    pub metadata: ResponseMetadata,
    /// Timing and retry accounting.
    #[serde(default)]
    pub performance: PerformanceInfo,
}

impl AiResponse {
    /// Creates a response with zero-initialized performance fields.
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            model: model.into(),
            content: content.into(),
            metadata: ResponseMetadata::default(),
            performance: PerformanceInfo::default(),
        }
    }

    /// Sets the backend metadata.
    pub fn with_metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Capability description of one model a provider serves.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    /// Model identifier.
    pub name: String,
    /// Maximum context window in tokens.
    pub context_window: u32,
    /// Maximum tokens the model can generate in one response.
    pub max_output_tokens: u32,
    /// Cost per 1 million input tokens in dollars.
    pub input_cost_per_1m: f64,
    /// Cost per 1 million output tokens in dollars.
    pub output_cost_per_1m: f64,
    /// Relative output quality score (0.0 - 1.0), used for routing.
    pub quality: f32,
}

impl ModelSpec {
    /// Creates a model spec with zero cost and median quality.
    pub fn new(name: impl Into<String>, context_window: u32, max_output_tokens: u32) -> Self {
        Self {
            name: name.into(),
            context_window,
            max_output_tokens,
            input_cost_per_1m: 0.0,
            output_cost_per_1m: 0.0,
            quality: 0.5,
        }
    }

    /// Sets pricing.
    pub fn with_pricing(mut self, input_cost_per_1m: f64, output_cost_per_1m: f64) -> Self {
        self.input_cost_per_1m = input_cost_per_1m;
        self.output_cost_per_1m = output_cost_per_1m;
        self
    }

    /// Sets the quality score.
    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }

    /// Dollar cost of the given usage against this model's price table.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 / 1_000_000.0) * self.input_cost_per_1m
            + (usage.output_tokens as f64 / 1_000_000.0) * self.output_cost_per_1m
    }

    /// Combined per-1M price, used as the cheapness key for routing.
    pub fn combined_cost_per_1m(&self) -> f64 {
        self.input_cost_per_1m + self.output_cost_per_1m
    }
}

/// Capability contract every AI backend satisfies.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable provider name used for routing.
    fn name(&self) -> &str;

    /// Models this provider accepts.
    fn models(&self) -> &[ModelSpec];

    /// Model used when a request names none.
    fn default_model(&self) -> &str;

    /// Sends a request to the backend and projects the reply onto the
    /// unified response shape. Performance fields come back zeroed except
    /// `retry_count`; the dispatch path stamps the timing.
    async fn send_request(&self, request: &AiRequest) -> Result<AiResponse, ProviderError>;

    /// Cheap local configuration check (e.g., credential present).
    ///
    /// Missing credentials surface here as `false`, never as a
    /// construction-time failure.
    fn validate_config(&self) -> bool;

    /// Dollar cost of the given usage for `model`; 0.0 for unknown models.
    fn calculate_cost(&self, usage: &TokenUsage, model: &str) -> f64 {
        self.find_model(model).map_or(0.0, |spec| spec.cost(usage))
    }

    /// Looks up the spec for a model name.
    fn find_model(&self, model: &str) -> Option<&ModelSpec> {
        self.models().iter().find(|spec| spec.name == model)
    }

    /// Normalizes and validates a request against this provider's models.
    ///
    /// An unknown model name is a validation failure, not a silent
    /// fallback.
    fn validate_request(&self, request: &AiRequest) -> Result<GenerationSettings, ProviderError> {
        let settings = normalize_request(request);
        let model_name = request.model.as_deref().unwrap_or(self.default_model());

        let spec = self
            .find_model(model_name)
            .ok_or_else(|| ProviderError::UnsupportedModel {
                provider: self.name().to_string(),
                model: model_name.to_string(),
            })?;

        if settings.max_tokens > spec.max_output_tokens {
            return Err(ProviderError::MaxTokensExceeded {
                model: spec.name.clone(),
                requested: settings.max_tokens,
                limit: spec.max_output_tokens,
            });
        }

        let estimated = estimate_tokens(&request.prompt);
        if estimated > spec.context_window {
            return Err(ProviderError::ContextLengthExceeded {
                model: spec.name.clone(),
                estimated,
                limit: spec.context_window,
            });
        }

        Ok(settings)
    }
}

impl std::fmt::Debug for dyn AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiProvider").field("name", &self.name()).finish()
    }
}
