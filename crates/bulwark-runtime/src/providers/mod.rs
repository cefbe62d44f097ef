//! Provider abstractions for the resilience layer.
//!
//! A provider is anything that can answer a chat turn. Implementations may
//! reject and may return structurally invalid payloads — both are expected
//! and handled upstream by [`ProtectedProvider`] and the circuit breaker.
//! At least two implementations (primary and fallback) are supplied to the
//! orchestrator at construction.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use bulwark_core::Message;

mod factory;
mod protected;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use protected::ProtectedProvider;
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

/// Errors from providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("payload parse error: {0}")]
    Parse(String),

    #[error("authentication failed")]
    Auth,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

/// An AI backend capable of answering a single chat turn.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Answer one turn.
    ///
    /// The payload is deliberately untyped: whatever the backend produced,
    /// well-formed or not. Callers repair it before anyone else sees it.
    async fn generate_response(
        &self,
        message: &str,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<Value, ProviderError>;

    /// Cheap probe used by the background health monitor.
    async fn health_check(&self) -> bool;

    /// Provider name for logs and metrics.
    fn name(&self) -> &str;
}
