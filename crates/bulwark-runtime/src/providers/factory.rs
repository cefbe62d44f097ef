//! Provider factories for config-driven construction.
//!
//! Applications register one factory per backend type and build providers
//! by name at the composition root, without a closed provider enum inside
//! this crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{ChatProvider, ProviderError};

/// Creates providers of one backend type from JSON configuration.
pub trait ProviderFactory: Send + Sync {
    /// Unique type identifier, e.g. "anthropic" or "local".
    fn provider_type(&self) -> &'static str;

    /// Build a provider instance from configuration.
    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ChatProvider>, ProviderError>;

    /// Validate configuration without building a provider. Useful for fast
    /// startup checks.
    fn validate_config(&self, _config: &JsonValue) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Registry of available provider factories, keyed by type name.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; a factory with the same type name is replaced.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Build a provider from a type name and configuration.
    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "unknown provider type '{}', available: {:?}",
                    provider_type,
                    self.available_types()
                ))
            })?
            .create(config)
    }

    /// Validate configuration for a provider type.
    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("unknown provider type '{}'", provider_type))
            })?
            .validate_config(config)
    }

    /// Registered type names, sorted.
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bulwark_core::Message;
    use serde_json::{json, Value};

    struct EchoProvider;

    #[async_trait]
    impl ChatProvider for EchoProvider {
        async fn generate_response(
            &self,
            message: &str,
            _system_prompt: &str,
            _history: &[Message],
        ) -> Result<Value, ProviderError> {
            Ok(json!(message))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct EchoFactory;

    impl ProviderFactory for EchoFactory {
        fn provider_type(&self) -> &'static str {
            "echo"
        }

        fn create(&self, _config: &JsonValue) -> Result<Arc<dyn ChatProvider>, ProviderError> {
            Ok(Arc::new(EchoProvider))
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoFactory));

        assert!(registry.has_provider("echo"));
        assert_eq!(registry.available_types(), vec!["echo"]);
        assert!(registry.create("echo", &json!({})).is_ok());
    }

    #[test]
    fn test_unknown_type_is_a_configuration_error() {
        let registry = ProviderRegistry::new();
        let result = registry.create("nope", &json!({}));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }
}
