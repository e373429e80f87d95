//! Runtime provider router.
//!
//! A dictionary of registered providers with a designated default. Requests
//! route by their `provider` field or fall back to the default; unknown
//! names and a missing default are explicit errors, never silent fallbacks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::ProviderError;
use crate::provider::types::{AiProvider, AiRequest, AiResponse};

/// Routes requests to registered providers.
#[derive(Default, Debug)]
pub struct ProviderManager {
    providers: HashMap<String, Arc<dyn AiProvider>>,
    default_provider: Option<String>,
}

impl ProviderManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its own name.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::DuplicateProvider` if the name is taken.
    pub fn register(&mut self, provider: Arc<dyn AiProvider>) -> Result<(), ProviderError> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(ProviderError::DuplicateProvider(name));
        }

        debug!(provider = %name, "Registered provider");
        self.providers.insert(name, provider);
        Ok(())
    }

    /// Designates the default provider.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::UnknownProvider` if no provider with that
    /// name is registered.
    pub fn set_default(&mut self, name: &str) -> Result<(), ProviderError> {
        if !self.providers.contains_key(name) {
            return Err(ProviderError::UnknownProvider(name.to_string()));
        }
        self.default_provider = Some(name.to_string());
        Ok(())
    }

    /// Resolves a provider by name, or the default when `name` is `None`.
    ///
    /// # Errors
    ///
    /// `UnknownProvider` for an unregistered name; `NoDefaultProvider` when
    /// no name is given and no default is designated.
    pub fn get_provider(&self, name: Option<&str>) -> Result<Arc<dyn AiProvider>, ProviderError> {
        let name = match name {
            Some(name) => name,
            None => self
                .default_provider
                .as_deref()
                .ok_or(ProviderError::NoDefaultProvider)?,
        };

        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }

    /// Routes a request to its provider (or the default) and dispatches it.
    pub async fn send_request(&self, request: &AiRequest) -> Result<AiResponse, ProviderError> {
        let provider = self.get_provider(request.provider.as_deref())?;
        provider.send_request(request).await
    }

    /// Name of the designated default provider.
    pub fn default_provider_name(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    /// Registered provider names, in no particular order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Snapshot of all registered providers.
    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn AiProvider>> {
        self.providers.values()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::{AiResponse, ModelSpec};
    use async_trait::async_trait;

    struct EchoProvider {
        name: &'static str,
        models: Vec<ModelSpec>,
    }

    impl EchoProvider {
        fn new(name: &'static str) -> Arc<dyn AiProvider> {
            Arc::new(Self {
                name,
                models: vec![ModelSpec::new("echo-1", 8_000, 4_000)],
            })
        }
    }

    #[async_trait]
    impl AiProvider for EchoProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn models(&self) -> &[ModelSpec] {
            &self.models
        }

        fn default_model(&self) -> &str {
            "echo-1"
        }

        async fn send_request(&self, request: &AiRequest) -> Result<AiResponse, ProviderError> {
            Ok(AiResponse::new("id", self.name, "echo-1", request.prompt.clone()))
        }

        fn validate_config(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut manager = ProviderManager::new();
        manager.register(EchoProvider::new("a")).unwrap();

        let err = manager.register(EchoProvider::new("a")).unwrap_err();
        assert!(matches!(err, ProviderError::DuplicateProvider(_)));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_set_default_requires_registration() {
        let mut manager = ProviderManager::new();
        let err = manager.set_default("ghost").unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(_)));

        manager.register(EchoProvider::new("real")).unwrap();
        manager.set_default("real").unwrap();
        assert_eq!(manager.default_provider_name(), Some("real"));
    }

    #[test]
    fn test_get_provider_resolution() {
        let mut manager = ProviderManager::new();
        manager.register(EchoProvider::new("a")).unwrap();
        manager.register(EchoProvider::new("b")).unwrap();
        manager.set_default("b").unwrap();

        assert_eq!(manager.get_provider(Some("a")).unwrap().name(), "a");
        assert_eq!(manager.get_provider(None).unwrap().name(), "b");

        let err = manager.get_provider(Some("ghost")).unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(_)));
    }

    #[test]
    fn test_no_default_is_an_explicit_error() {
        let mut manager = ProviderManager::new();
        manager.register(EchoProvider::new("a")).unwrap();

        let err = manager.get_provider(None).unwrap_err();
        assert!(matches!(err, ProviderError::NoDefaultProvider));
    }

    #[tokio::test]
    async fn test_send_request_routes_by_provider_field() {
        let mut manager = ProviderManager::new();
        manager.register(EchoProvider::new("a")).unwrap();
        manager.register(EchoProvider::new("b")).unwrap();
        manager.set_default("a").unwrap();

        let routed = manager
            .send_request(&AiRequest::new("hello").with_provider("b"))
            .await
            .unwrap();
        assert_eq!(routed.provider, "b");

        let defaulted = manager.send_request(&AiRequest::new("hello")).await.unwrap();
        assert_eq!(defaulted.provider, "a");
    }
}
