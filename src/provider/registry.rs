//! Provider discovery and recommendation.
//!
//! The registry takes a set of candidate providers, partitions them by
//! configuration validity, and answers capability questions: which provider
//! serves a model, which one fits a request type or complexity level, and
//! whether each one currently passes its configuration check.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ProviderError;
use crate::provider::manager::ProviderManager;
use crate::provider::types::AiProvider;

/// Task complexity bands used for provider recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    /// Cheap-and-fast work; cost dominates the choice.
    Low,
    /// Balanced work; quality per dollar dominates.
    Medium,
    /// Hard work; quality dominates regardless of cost.
    High,
}

/// Capability summary for one candidate provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderCapability {
    /// Provider name.
    pub name: String,
    /// Models the provider serves.
    pub models: Vec<String>,
    /// Whether the provider passed `validate_config` at registration.
    pub is_valid: bool,
    /// Number of models served.
    pub model_count: usize,
}

/// Names of providers partitioned by configuration validity.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredProviders {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

/// Result of one timed configuration check.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthReport {
    /// Provider name.
    pub name: String,
    /// Whether `validate_config` passed.
    pub is_healthy: bool,
    /// How long the check took in milliseconds.
    pub checked_in_ms: u64,
    /// Failure description when unhealthy.
    pub error: Option<String>,
}

/// Partitioned set of candidate providers.
pub struct ProviderRegistry {
    valid: Vec<Arc<dyn AiProvider>>,
    invalid: Vec<Arc<dyn AiProvider>>,
}

impl ProviderRegistry {
    /// Partitions candidates via `validate_config`.
    ///
    /// Invalid providers are kept for capability reporting and health
    /// checks; they are never routed to.
    pub fn new(candidates: Vec<Arc<dyn AiProvider>>) -> Self {
        let mut valid = Vec::new();
        let mut invalid = Vec::new();

        for provider in candidates {
            if provider.validate_config() {
                info!(provider = provider.name(), "Provider configuration valid");
                valid.push(provider);
            } else {
                warn!(
                    provider = provider.name(),
                    "Provider configuration invalid, excluded from routing"
                );
                invalid.push(provider);
            }
        }

        Self { valid, invalid }
    }

    /// Names of the discovered providers by validity.
    pub fn discovered(&self) -> DiscoveredProviders {
        DiscoveredProviders {
            valid: self.valid.iter().map(|p| p.name().to_string()).collect(),
            invalid: self.invalid.iter().map(|p| p.name().to_string()).collect(),
        }
    }

    /// Capability summary across all candidates, valid and invalid.
    pub fn capabilities(&self) -> Vec<ProviderCapability> {
        let describe = |provider: &Arc<dyn AiProvider>, is_valid: bool| {
            let models: Vec<String> = provider
                .models()
                .iter()
                .map(|spec| spec.name.clone())
                .collect();
            ProviderCapability {
                name: provider.name().to_string(),
                model_count: models.len(),
                models,
                is_valid,
            }
        };

        self.valid
            .iter()
            .map(|p| describe(p, true))
            .chain(self.invalid.iter().map(|p| describe(p, false)))
            .collect()
    }

    /// The valid provider serving `model`, if any.
    pub fn find_by_model(&self, model: &str) -> Option<Arc<dyn AiProvider>> {
        self.valid
            .iter()
            .find(|p| p.find_model(model).is_some())
            .cloned()
    }

    /// Recommends a provider for a request type hint.
    ///
    /// Types describing hard work (code, analysis, reasoning) map to the
    /// high-complexity recommendation; conversational types map to low;
    /// everything else is treated as medium.
    pub fn recommend(&self, request_type: &str) -> Option<Arc<dyn AiProvider>> {
        let complexity = match request_type {
            "code" | "code_generation" | "analysis" | "reasoning" => Complexity::High,
            "chat" | "completion" | "summary" => Complexity::Low,
            _ => Complexity::Medium,
        };
        self.recommend_by_complexity(complexity)
    }

    /// Recommends a provider for a complexity band.
    pub fn recommend_by_complexity(&self, complexity: Complexity) -> Option<Arc<dyn AiProvider>> {
        match complexity {
            Complexity::Low => self.select_by(|provider| {
                // Cheapest model wins; negate so the common max-selection applies.
                provider
                    .models()
                    .iter()
                    .map(|spec| -spec.combined_cost_per_1m())
                    .fold(f64::NEG_INFINITY, f64::max)
            }),
            Complexity::Medium => self.select_by(|provider| {
                provider
                    .models()
                    .iter()
                    .map(|spec| spec.quality as f64 / spec.combined_cost_per_1m().max(0.01))
                    .fold(f64::NEG_INFINITY, f64::max)
            }),
            Complexity::High => self.select_by(|provider| {
                provider
                    .models()
                    .iter()
                    .map(|spec| spec.quality as f64)
                    .fold(f64::NEG_INFINITY, f64::max)
            }),
        }
    }

    fn select_by<F>(&self, score: F) -> Option<Arc<dyn AiProvider>>
    where
        F: Fn(&Arc<dyn AiProvider>) -> f64,
    {
        self.valid
            .iter()
            .max_by(|a, b| {
                score(a)
                    .partial_cmp(&score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    /// Re-runs every candidate's configuration check with timing.
    pub fn check_health(&self) -> Vec<ProviderHealthReport> {
        self.valid
            .iter()
            .chain(self.invalid.iter())
            .map(|provider| {
                let started = Instant::now();
                let is_healthy = provider.validate_config();
                ProviderHealthReport {
                    name: provider.name().to_string(),
                    is_healthy,
                    checked_in_ms: started.elapsed().as_millis() as u64,
                    error: (!is_healthy)
                        .then(|| "configuration validation failed".to_string()),
                }
            })
            .collect()
    }

    /// Builds the runtime router over the valid providers.
    ///
    /// The first valid provider becomes the default.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::DuplicateProvider` if two valid candidates
    /// share a name.
    pub fn create_manager(&self) -> Result<ProviderManager, ProviderError> {
        let mut manager = ProviderManager::new();

        for provider in &self.valid {
            manager.register(Arc::clone(provider))?;
        }

        if let Some(first) = self.valid.first() {
            manager.set_default(first.name())?;
        }

        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::{AiRequest, AiResponse, ModelSpec};
    use async_trait::async_trait;

    struct StubProvider {
        name: &'static str,
        valid: bool,
        models: Vec<ModelSpec>,
    }

    impl StubProvider {
        fn new(name: &'static str, valid: bool, models: Vec<ModelSpec>) -> Arc<dyn AiProvider> {
            Arc::new(Self {
                name,
                valid,
                models,
            })
        }
    }

    #[async_trait]
    impl AiProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn models(&self) -> &[ModelSpec] {
            &self.models
        }

        fn default_model(&self) -> &str {
            &self.models[0].name
        }

        async fn send_request(&self, _request: &AiRequest) -> Result<AiResponse, ProviderError> {
            Ok(AiResponse::new("id", self.name, &self.models[0].name, "ok"))
        }

        fn validate_config(&self) -> bool {
            self.valid
        }
    }

    fn cheap_provider() -> Arc<dyn AiProvider> {
        StubProvider::new(
            "cheap",
            true,
            vec![ModelSpec::new("tiny", 8_000, 1_000)
                .with_pricing(0.1, 0.4)
                .with_quality(0.5)],
        )
    }

    fn premium_provider() -> Arc<dyn AiProvider> {
        StubProvider::new(
            "premium",
            true,
            vec![ModelSpec::new("grand", 200_000, 8_000)
                .with_pricing(10.0, 30.0)
                .with_quality(0.95)],
        )
    }

    fn broken_provider() -> Arc<dyn AiProvider> {
        StubProvider::new(
            "broken",
            false,
            vec![ModelSpec::new("never", 8_000, 1_000)],
        )
    }

    #[test]
    fn test_partition_by_config_validity() {
        let registry =
            ProviderRegistry::new(vec![cheap_provider(), premium_provider(), broken_provider()]);

        let discovered = registry.discovered();
        assert_eq!(discovered.valid, vec!["cheap", "premium"]);
        assert_eq!(discovered.invalid, vec!["broken"]);
    }

    #[test]
    fn test_capabilities_cover_invalid_providers() {
        let registry = ProviderRegistry::new(vec![cheap_provider(), broken_provider()]);
        let capabilities = registry.capabilities();

        assert_eq!(capabilities.len(), 2);
        let broken = capabilities
            .iter()
            .find(|c| c.name == "broken")
            .expect("invalid provider should still be reported");
        assert!(!broken.is_valid);
        assert_eq!(broken.model_count, 1);
    }

    #[test]
    fn test_find_by_model_only_routes_to_valid() {
        let registry = ProviderRegistry::new(vec![cheap_provider(), broken_provider()]);

        assert_eq!(
            registry.find_by_model("tiny").map(|p| p.name().to_string()),
            Some("cheap".to_string())
        );
        assert!(registry.find_by_model("never").is_none());
        assert!(registry.find_by_model("missing").is_none());
    }

    #[test]
    fn test_recommend_by_complexity() {
        let registry = ProviderRegistry::new(vec![cheap_provider(), premium_provider()]);

        let low = registry
            .recommend_by_complexity(Complexity::Low)
            .expect("a provider should be recommended");
        assert_eq!(low.name(), "cheap");

        let high = registry
            .recommend_by_complexity(Complexity::High)
            .expect("a provider should be recommended");
        assert_eq!(high.name(), "premium");
    }

    #[test]
    fn test_recommend_maps_request_types() {
        let registry = ProviderRegistry::new(vec![cheap_provider(), premium_provider()]);

        assert_eq!(registry.recommend("code").unwrap().name(), "premium");
        assert_eq!(registry.recommend("chat").unwrap().name(), "cheap");
        assert!(registry.recommend("anything-else").is_some());
    }

    #[test]
    fn test_recommend_with_no_valid_providers() {
        let registry = ProviderRegistry::new(vec![broken_provider()]);
        assert!(registry.recommend_by_complexity(Complexity::Low).is_none());
    }

    #[test]
    fn test_check_health_reports_all_candidates() {
        let registry = ProviderRegistry::new(vec![cheap_provider(), broken_provider()]);
        let reports = registry.check_health();

        assert_eq!(reports.len(), 2);
        let cheap = reports.iter().find(|r| r.name == "cheap").unwrap();
        assert!(cheap.is_healthy);
        assert!(cheap.error.is_none());

        let broken = reports.iter().find(|r| r.name == "broken").unwrap();
        assert!(!broken.is_healthy);
        assert!(broken.error.is_some());
    }

    #[test]
    fn test_create_manager_uses_first_valid_as_default() {
        let registry = ProviderRegistry::new(vec![cheap_provider(), premium_provider()]);
        let manager = registry.create_manager().expect("manager should build");

        assert_eq!(manager.default_provider_name(), Some("cheap"));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_create_manager_rejects_duplicate_names() {
        let registry = ProviderRegistry::new(vec![cheap_provider(), cheap_provider()]);
        let err = registry.create_manager().unwrap_err();
        assert!(matches!(err, ProviderError::DuplicateProvider(_)));
    }
}
