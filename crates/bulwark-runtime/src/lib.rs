//! # bulwark-runtime
//!
//! Async resilience runtime for AI providers: callers always receive a
//! structurally valid response, within bounded time, even when the primary
//! provider is slow, erroring, rate-limited, or returning malformed
//! payloads.
//!
//! The degradation ladder, in order:
//!
//! 1. exact cache hit
//! 2. primary provider (through the circuit breaker)
//! 3. fallback provider
//! 4. similar cached response
//! 5. emergency pool
//!
//! Every rung below the primary is honest about itself: the service state
//! moves to Degraded/Limited/Unavailable and responses carry an apologetic
//! sentiment rather than an error code. Nothing at request time ever
//! surfaces as an `Err`; only construction mistakes do.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bulwark_runtime::{ResilientOrchestrator, RuntimeConfig};
//!
//! let orchestrator = ResilientOrchestrator::builder()
//!     .primary(Arc::new(primary_provider))
//!     .fallback(Arc::new(fallback_provider))
//!     .config(RuntimeConfig::from_yaml_file("bulwark.yaml")?)
//!     .build()?;
//! orchestrator.spawn_health_monitor();
//!
//! let response = orchestrator
//!     .generate_response("What's my credit score impact?", system_prompt, &history)
//!     .await;
//! println!("{} ({})", response.response, orchestrator.get_status().state);
//! ```

pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod providers;
pub mod resilience;
pub mod status;

pub use cache::{CacheConfig, ResponseCache};
pub use config::{ConfigError, RuntimeConfig};
pub use orchestrator::{OrchestratorBuilder, OrchestratorError, ResilientOrchestrator};
pub use providers::{
    ChatProvider, ProtectedProvider, ProviderError, ProviderFactory, ProviderRegistry,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use status::{OrchestratorEvent, ServiceState, ServiceStatus};

#[cfg(feature = "anthropic")]
pub use providers::{AnthropicProvider, AnthropicProviderFactory};
