//! The resilient orchestrator: the single entry point callers use.
//!
//! Composes the cache, circuit breaker, protected providers, and emergency
//! pool into one guaranteed-response operation. The degradation ladder:
//!
//! ```text
//! cache hit -> primary -> fallback provider -> similar cached -> emergency
//! ```
//!
//! [`ResilientOrchestrator::generate_response`] is total: every runtime
//! failure mode is absorbed and converted into a contract-valid response.
//! Only construction mistakes surface as real errors.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use bulwark_core::{AiResponse, EmergencyPool, Message};

use crate::cache::ResponseCache;
use crate::config::{ConfigError, RuntimeConfig};
use crate::providers::{ChatProvider, ProtectedProvider, ProviderError};
use crate::resilience::CircuitBreaker;
use crate::status::{health_percentage, OrchestratorEvent, ServiceState, ServiceStatus};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors from orchestrator construction. These indicate wiring bugs and
/// are the only errors this module ever surfaces.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("primary provider not configured")]
    MissingPrimary,

    #[error("fallback provider not configured")]
    MissingFallback,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

struct StatusInner {
    state: ServiceState,
    last_error: Option<String>,
}

/// Guaranteed-response front for a primary/fallback provider pair.
pub struct ResilientOrchestrator {
    primary: ProtectedProvider,
    fallback: ProtectedProvider,
    cache: ResponseCache,
    breaker: CircuitBreaker,
    emergency: EmergencyPool,
    config: RuntimeConfig,
    status: Mutex<StatusInner>,
    events: broadcast::Sender<OrchestratorEvent>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ResilientOrchestrator {
    /// Start building an orchestrator.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Answer a chat turn. Never fails and never panics: some response
    /// satisfying the contract always comes back.
    pub async fn generate_response(
        &self,
        message: &str,
        system_prompt: &str,
        history: &[Message],
    ) -> AiResponse {
        let key = self.cache.conversation_key(message, history);

        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!("cache hit, providers skipped");
            return hit;
        }

        // Shared by both attempt closures; a Copy reference keeps the
        // futures free of borrows into the closures themselves.
        let key = key.as_str();

        let primary_attempt = || async move {
            match self.primary.generate(message, system_prompt, history).await {
                Ok(response) => {
                    self.cache.set(key, response.clone());
                    self.set_last_error(None);
                    self.enter_state(ServiceState::Healthy);
                    Ok(response)
                }
                Err(error) => {
                    self.set_last_error(Some(error.to_string()));
                    Err(error)
                }
            }
        };

        let fallback_attempt = || async move {
            let response = self
                .fallback
                .generate(message, system_prompt, history)
                .await?;
            // Degraded confidence: cache with the shorter lifetime.
            self.cache
                .set_with_ttl(key, response.clone(), self.config.cache.fallback_ttl);
            self.enter_state(ServiceState::Degraded);
            Ok::<_, ProviderError>(response)
        };

        match self.breaker.execute(primary_attempt, fallback_attempt).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(error = %error, "fallback provider failed too");
                self.set_last_error(Some(error.to_string()));
                if let Some(similar) = self.cache.find_similar(message) {
                    self.enter_state(ServiceState::Limited);
                    similar
                } else {
                    self.enter_state(ServiceState::Unavailable);
                    self.emergency.pick()
                }
            }
        }
    }

    /// Current service status, recomputed from the live circuit state.
    pub fn get_status(&self) -> ServiceStatus {
        let circuit = self.breaker.state();
        let inner = self.status.lock();
        ServiceStatus {
            state: inner.state,
            circuit_state: circuit,
            health_percentage: health_percentage(circuit),
            last_error: inner.last_error.clone(),
            checked_at: chrono::Utc::now(),
        }
    }

    /// Subscribe to state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Run one health probe against the primary provider.
    ///
    /// Success resets the breaker and restores Healthy. Failure changes
    /// nothing: only real traffic counts toward the failure threshold, so
    /// probes alone can never trip the circuit during quiet periods.
    pub async fn run_health_check(&self) {
        if self.primary.health_check().await {
            tracing::debug!("health probe succeeded");
            self.breaker.reset();
            self.set_last_error(None);
            self.enter_state(ServiceState::Healthy);
        } else {
            tracing::debug!("health probe failed, circuit untouched");
        }
    }

    /// Start the periodic health monitor and the breaker's idle monitor.
    /// Calling it twice is a no-op. Must run inside a tokio runtime.
    pub fn spawn_health_monitor(self: &Arc<Self>) {
        {
            let mut slot = self.health_task.lock();
            if slot.is_none() {
                let weak = Arc::downgrade(self);
                let period = self.config.health_check_interval;
                *slot = Some(tokio::spawn(async move {
                    let mut tick = tokio::time::interval(period);
                    tick.tick().await;
                    loop {
                        tick.tick().await;
                        let Some(orchestrator) = weak.upgrade() else {
                            break;
                        };
                        orchestrator.run_health_check().await;
                    }
                }));
            }
        }
        self.breaker.spawn_monitor();
    }

    /// Stop background tasks. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }
        self.breaker.dispose();
    }

    fn enter_state(&self, to: ServiceState) {
        let from = {
            let mut inner = self.status.lock();
            if inner.state == to {
                return;
            }
            let from = inner.state;
            inner.state = to;
            from
        };
        tracing::info!(%from, %to, "service state changed");
        let _ = self.events.send(OrchestratorEvent::StateChanged { from, to });
    }

    fn set_last_error(&self, error: Option<String>) {
        self.status.lock().last_error = error;
    }
}

impl Drop for ResilientOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`ResilientOrchestrator`].
pub struct OrchestratorBuilder {
    primary: Option<Arc<dyn ChatProvider>>,
    fallback: Option<Arc<dyn ChatProvider>>,
    config: RuntimeConfig,
    emergency: EmergencyPool,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            primary: None,
            fallback: None,
            config: RuntimeConfig::default(),
            emergency: EmergencyPool::default(),
        }
    }

    /// Set the primary provider.
    pub fn primary(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.primary = Some(provider);
        self
    }

    /// Set the fallback provider.
    pub fn fallback(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    /// Set the runtime configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default emergency pool.
    pub fn emergency_pool(mut self, pool: EmergencyPool) -> Self {
        self.emergency = pool;
        self
    }

    /// Build the orchestrator. Fails only on wiring bugs: a missing
    /// provider or an invalid configuration.
    pub fn build(self) -> Result<Arc<ResilientOrchestrator>, OrchestratorError> {
        let primary = self.primary.ok_or(OrchestratorError::MissingPrimary)?;
        let fallback = self.fallback.ok_or(OrchestratorError::MissingFallback)?;
        self.config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let breaker = CircuitBreaker::new(self.config.circuit_breaker.clone());
        let forward = events.clone();
        breaker.on_transition(move |from, to| {
            let _ = forward.send(OrchestratorEvent::CircuitStateChanged { from, to });
        });

        Ok(Arc::new(ResilientOrchestrator {
            primary: ProtectedProvider::new(primary),
            fallback: ProtectedProvider::new(fallback),
            cache: ResponseCache::new(self.config.cache.clone()),
            breaker,
            emergency: self.emergency,
            config: self.config,
            status: Mutex::new(StatusInner {
                state: ServiceState::Healthy,
                last_error: None,
            }),
            events,
            health_task: Mutex::new(None),
        }))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use async_trait::async_trait;
    use bulwark_core::conforms;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    /// Scripted provider: a fixed payload, a failure switch, a call counter.
    struct MockProvider {
        payload: Value,
        fail: AtomicBool,
        healthy: AtomicBool,
        calls: AtomicU32,
    }

    impl MockProvider {
        fn ok(payload: Value) -> Arc<Self> {
            Arc::new(Self {
                payload,
                fail: AtomicBool::new(false),
                healthy: AtomicBool::new(true),
                calls: AtomicU32::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            let provider = Self::ok(json!("unused"));
            provider.fail.store(true, Ordering::SeqCst);
            provider.healthy.store(false, Ordering::SeqCst);
            provider
        }

        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
            self.healthy.store(!failing, Ordering::SeqCst);
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatProvider for MockProvider {
        async fn generate_response(
            &self,
            _message: &str,
            _system_prompt: &str,
            _history: &[Message],
        ) -> Result<Value, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(ProviderError::Http("connection reset".to_string()))
            } else {
                Ok(self.payload.clone())
            }
        }

        async fn health_check(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout: Duration::from_secs(60),
            },
            health_check_interval: Duration::from_millis(50),
        }
    }

    fn orchestrator(
        primary: Arc<MockProvider>,
        fallback: Arc<MockProvider>,
    ) -> Arc<ResilientOrchestrator> {
        ResilientOrchestrator::builder()
            .primary(primary)
            .fallback(fallback)
            .config(test_config())
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_both_providers() {
        let result = ResilientOrchestrator::builder()
            .primary(MockProvider::ok(json!("hi")))
            .build();
        assert!(matches!(result, Err(OrchestratorError::MissingFallback)));

        let result = ResilientOrchestrator::builder().build();
        assert!(matches!(result, Err(OrchestratorError::MissingPrimary)));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = test_config();
        config.cache.max_entries = 0;
        let result = ResilientOrchestrator::builder()
            .primary(MockProvider::ok(json!("hi")))
            .fallback(MockProvider::ok(json!("hi")))
            .config(config)
            .build();
        assert!(matches!(result, Err(OrchestratorError::Config(_))));
    }

    // Scenario: primary succeeds, result is cached, a repeat call within
    // TTL answers from cache without touching either provider.
    #[tokio::test]
    async fn test_primary_success_then_cache_hit() {
        let primary = MockProvider::ok(json!({
            "response": "A new card lowers your average account age slightly.",
            "sentiment": "informative"
        }));
        let fallback = MockProvider::ok(json!("unused fallback"));
        let orch = orchestrator(Arc::clone(&primary), Arc::clone(&fallback));

        let first = orch
            .generate_response("What's my credit score impact?", "", &[])
            .await;
        assert_eq!(
            first.response,
            "A new card lowers your average account age slightly."
        );

        let second = orch
            .generate_response("What's my credit score impact?", "", &[])
            .await;
        assert_eq!(second, first);
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);

        let status = orch.get_status();
        assert_eq!(status.state, ServiceState::Healthy);
        assert_eq!(status.circuit_state, CircuitState::Closed);
        assert_eq!(status.health_percentage, 100);
    }

    // Scenario: primary always fails, fallback succeeds. Every call gets a
    // normalized fallback answer and the service reports Degraded. Once
    // the circuit opens, the primary stops being attempted at all.
    #[tokio::test]
    async fn test_fallback_path_reports_degraded() {
        let primary = MockProvider::failing();
        let fallback = MockProvider::ok(json!({ "response": "Fallback answer." }));
        let orch = orchestrator(Arc::clone(&primary), Arc::clone(&fallback));

        for i in 0..5 {
            let response = orch
                .generate_response(&format!("question number {i}"), "", &[])
                .await;
            assert_eq!(response.response, "Fallback answer.");
        }

        assert_eq!(orch.get_status().state, ServiceState::Degraded);
        // Threshold is 3: the circuit opened there and later calls skipped
        // the primary entirely.
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 5);
        assert_eq!(orch.get_status().circuit_state, CircuitState::Open);
        assert_eq!(orch.get_status().health_percentage, 0);
    }

    // Scenario: both providers fail, but a token-overlapping response was
    // cached earlier. The cached value comes back and status is Limited.
    #[tokio::test]
    async fn test_similar_cache_rescue_reports_limited() {
        let primary = MockProvider::ok(json!({
            "response": "Utilization under thirty percent helps your credit score."
        }));
        let fallback = MockProvider::failing();
        let orch = orchestrator(Arc::clone(&primary), Arc::clone(&fallback));

        let cached = orch
            .generate_response("how does utilization affect my credit score", "", &[])
            .await;

        primary.set_failing(true);
        let rescued = orch
            .generate_response("does utilization really affect my credit score", "", &[])
            .await;

        assert_eq!(rescued, cached);
        let status = orch.get_status();
        assert_eq!(status.state, ServiceState::Limited);
        assert!(status.last_error.is_some());
    }

    // Scenario: both providers fail and nothing similar is cached. One of
    // the emergency entries comes back, fully schema-valid, and status is
    // Unavailable.
    #[tokio::test]
    async fn test_emergency_pool_reports_unavailable() {
        let primary = MockProvider::failing();
        let fallback = MockProvider::failing();
        let orch = orchestrator(primary, fallback);

        let response = orch.generate_response("anything at all", "", &[]).await;

        assert!(conforms(&response));
        assert!(EmergencyPool::default().entries().contains(&response));
        assert_eq!(orch.get_status().state, ServiceState::Unavailable);
    }

    #[tokio::test]
    async fn test_malformed_primary_payload_is_normalized_and_cached() {
        let primary = MockProvider::ok(json!({
            "response": { "text": "repaired before anyone sees it" }
        }));
        let fallback = MockProvider::ok(json!("unused"));
        let orch = orchestrator(Arc::clone(&primary), fallback);

        let first = orch.generate_response("malformed test", "", &[]).await;
        assert_eq!(first.response, "repaired before anyone sees it");
        assert!(conforms(&first));

        // The cached copy is the repaired one.
        let second = orch.generate_response("malformed test", "", &[]).await;
        assert_eq!(second, first);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_history_shapes_the_cache_key() {
        let primary = MockProvider::ok(json!({ "response": "answer" }));
        let fallback = MockProvider::ok(json!("unused"));
        let orch = orchestrator(Arc::clone(&primary), fallback);

        let history = vec![Message::user("earlier turn")];
        orch.generate_response("same message", "", &[]).await;
        orch.generate_response("same message", "", &history).await;

        // Different conversational context, different key, second call
        // reached the provider.
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn test_events_cover_circuit_and_state_changes() {
        let primary = MockProvider::failing();
        let fallback = MockProvider::ok(json!({ "response": "ok" }));
        let orch = orchestrator(primary, fallback);
        let mut events = orch.subscribe();

        for i in 0..3 {
            orch.generate_response(&format!("warmup {i}"), "", &[]).await;
        }

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }

        assert!(seen.contains(&OrchestratorEvent::StateChanged {
            from: ServiceState::Healthy,
            to: ServiceState::Degraded,
        }));
        assert!(seen.contains(&OrchestratorEvent::CircuitStateChanged {
            from: CircuitState::Closed,
            to: CircuitState::Open,
        }));
    }

    #[tokio::test]
    async fn test_successful_health_check_resets_the_circuit() {
        let primary = MockProvider::failing();
        let fallback = MockProvider::ok(json!({ "response": "ok" }));
        let orch = orchestrator(Arc::clone(&primary), fallback);

        for i in 0..3 {
            orch.generate_response(&format!("trip {i}"), "", &[]).await;
        }
        assert_eq!(orch.get_status().circuit_state, CircuitState::Open);

        // Primary recovers; the next probe restores full health.
        primary.set_failing(false);
        orch.run_health_check().await;

        let status = orch.get_status();
        assert_eq!(status.circuit_state, CircuitState::Closed);
        assert_eq!(status.state, ServiceState::Healthy);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_failed_health_check_changes_nothing() {
        let primary = MockProvider::failing();
        let fallback = MockProvider::ok(json!({ "response": "ok" }));
        let orch = orchestrator(primary, fallback);

        orch.generate_response("one failure", "", &[]).await;
        let before = orch.get_status();

        orch.run_health_check().await;

        let after = orch.get_status();
        assert_eq!(after.circuit_state, before.circuit_state);
        assert_eq!(after.state, before.state);
        // A failed probe adds nothing to the failure count either.
        assert_eq!(orch.breaker.failure_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_monitor_restores_health() {
        let primary = MockProvider::failing();
        let fallback = MockProvider::ok(json!({ "response": "ok" }));
        let orch = orchestrator(Arc::clone(&primary), fallback);

        for i in 0..3 {
            orch.generate_response(&format!("trip {i}"), "", &[]).await;
        }
        assert_eq!(orch.get_status().circuit_state, CircuitState::Open);

        primary.set_failing(false);
        orch.spawn_health_monitor();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(orch.get_status().circuit_state, CircuitState::Closed);
        assert_eq!(orch.get_status().state, ServiceState::Healthy);
        orch.shutdown();
        orch.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_requests_all_resolve() {
        let primary = MockProvider::ok(json!({ "response": "shared answer" }));
        let fallback = MockProvider::ok(json!("unused"));
        let orch = orchestrator(primary, fallback);

        let mut handles = Vec::new();
        for i in 0..16 {
            let orch = Arc::clone(&orch);
            handles.push(tokio::spawn(async move {
                orch.generate_response(&format!("parallel {}", i % 4), "", &[])
                    .await
            }));
        }

        for handle in handles {
            let response = handle.await.unwrap();
            assert_eq!(response.response, "shared answer");
        }
    }
}
