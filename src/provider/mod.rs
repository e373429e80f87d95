//! Provider abstraction over AI backends.
//!
//! Every backend is a capability object implementing [`AiProvider`]: a
//! stable name, a model table, request dispatch, cost calculation and a
//! cheap configuration check. The [`ProviderRegistry`] partitions candidate
//! providers by configuration validity and answers routing questions; the
//! [`ProviderManager`] it builds is the runtime router the request
//! processor dispatches through.

pub mod anthropic;
pub mod manager;
pub mod openai;
pub mod registry;
pub mod types;

// Re-export main types for convenience
pub use anthropic::AnthropicProvider;
pub use manager::ProviderManager;
pub use openai::OpenAiProvider;
pub use registry::{
    Complexity, DiscoveredProviders, ProviderCapability, ProviderHealthReport, ProviderRegistry,
};
pub use types::{
    estimate_tokens, normalize_request, AiProvider, AiRequest, AiResponse, GenerationSettings,
    ModelSpec, PerformanceInfo, RequestParameters, ResponseMetadata, TokenUsage,
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P,
};
