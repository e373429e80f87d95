//! Error types shared across subsystems.
//!
//! Subsystem-local errors (queue, pool, processor) live next to their
//! components; the provider error is shared between the provider
//! implementations, the registry and the request processor, so it lives
//! here.

use thiserror::Error;

/// Errors surfaced by AI provider backends and their routing layer.
///
/// Backend failures of any shape are wrapped into one of these variants
/// with the original message preserved, so callers see a single error kind
/// regardless of which provider misbehaved.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credential required by the provider is absent or empty.
    #[error("Missing credentials for provider '{0}'")]
    MissingCredentials(String),

    /// Request named a provider nobody registered.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Request named no provider and no default is configured.
    #[error("No default provider configured")]
    NoDefaultProvider,

    /// A provider with the same name is already registered.
    #[error("Provider '{0}' is already registered")]
    DuplicateProvider(String),

    /// Request named a model the provider does not serve.
    #[error("Unsupported model '{model}' for provider '{provider}'")]
    UnsupportedModel { provider: String, model: String },

    /// Requested max_tokens exceeds the model's output limit.
    #[error("max_tokens {requested} exceeds the {limit}-token output limit of model '{model}'")]
    MaxTokensExceeded {
        model: String,
        requested: u32,
        limit: u32,
    },

    /// Estimated prompt length exceeds the model's context window.
    #[error("Prompt of ~{estimated} tokens exceeds the {limit}-token context window of model '{model}'")]
    ContextLengthExceeded {
        model: String,
        estimated: u32,
        limit: u32,
    },

    /// HTTP transport failure.
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Backend rejected the request with a rate limit.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Backend returned a non-success status.
    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// Backend response did not match the expected shape.
    #[error("Failed to parse provider response: {0}")]
    ParseError(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::RequestFailed(e.to_string())
    }
}

impl ProviderError {
    /// Whether a retry against the same backend can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RequestFailed(_) | ProviderError::RateLimited(_) => true,
            ProviderError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }
}
