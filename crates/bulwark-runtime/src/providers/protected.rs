//! A decorator that guarantees contract-valid output from any provider.
//!
//! Protection is explicit composition, not in-place patching: the wrapped
//! provider is called as-is and every successful payload is normalized
//! before anything downstream sees it. Provider errors pass through
//! untouched so the circuit breaker can count them.

use std::sync::Arc;

use bulwark_core::{normalize, AiResponse, Message};

use super::{ChatProvider, ProviderError};

/// Wraps a [`ChatProvider`] and normalizes everything it returns.
#[derive(Clone)]
pub struct ProtectedProvider {
    inner: Arc<dyn ChatProvider>,
}

impl ProtectedProvider {
    pub fn new(inner: Arc<dyn ChatProvider>) -> Self {
        Self { inner }
    }

    /// Call the wrapped provider and repair its payload.
    pub async fn generate(
        &self,
        message: &str,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<AiResponse, ProviderError> {
        let payload = self
            .inner
            .generate_response(message, system_prompt, history)
            .await?;
        tracing::trace!(provider = %self.inner.name(), "payload received");
        Ok(normalize(&payload))
    }

    /// Delegate the health probe to the wrapped provider.
    pub async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }
}
