//! Anthropic Messages-API provider.
//!
//! Returns the raw model payload: if the model answered with JSON, that
//! JSON; otherwise the text itself. Repair happens upstream in
//! [`ProtectedProvider`](super::ProtectedProvider), never here.
//!
//! Transient failures (timeouts, 429s, 5xx) are retried with exponential
//! backoff before they count against the circuit breaker.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use bulwark_core::{Message, Role};

use super::factory::ProviderFactory;
use super::secrets::{ApiCredential, CredentialSource};
use super::{ChatProvider, ProviderError};

/// Environment variable holding the API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: usize = 2;

/// Anthropic Claude provider.
///
/// The API key lives in an [`ApiCredential`]: it cannot leak through
/// `Debug` output and is zeroed on drop.
pub struct AnthropicProvider {
    credential: ApiCredential,
    base_url: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl AnthropicProvider {
    /// Create a provider with a programmatic API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_credential(ApiCredential::new(
            api_key,
            CredentialSource::Programmatic,
            "Anthropic API key",
        ))
    }

    /// Create a provider from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(ANTHROPIC_API_KEY_ENV, "Anthropic API key")?;
        Ok(Self::with_credential(credential))
    }

    /// Create a provider from JSON configuration, with environment fallback
    /// for the key. Recognized keys: `api_key`, `base_url`, `model`,
    /// `max_tokens`.
    pub fn from_config(config: &Value) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            ANTHROPIC_API_KEY_ENV,
            "Anthropic API key",
        )?;

        let mut provider = Self::with_credential(credential);
        if let Some(url) = config["base_url"].as_str() {
            provider.base_url = url.to_string();
        }
        if let Some(model) = config["model"].as_str() {
            provider.model = model.to_string();
        }
        if let Some(max_tokens) = config["max_tokens"].as_u64() {
            provider.max_tokens = max_tokens as u32;
        }
        Ok(provider)
    }

    fn with_credential(credential: ApiCredential) -> Self {
        Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the API endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Override the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn client() -> &'static reqwest::Client {
        static CLIENT: std::sync::OnceLock<reqwest::Client> = std::sync::OnceLock::new();
        CLIENT.get_or_init(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client")
        })
    }

    fn wire_messages(&self, message: &str, history: &[Message]) -> Vec<WireMessage> {
        let mut messages: Vec<WireMessage> = history
            .iter()
            .filter_map(|m| match m.role {
                Role::User => Some(WireMessage {
                    role: "user",
                    content: m.content.clone(),
                }),
                Role::Assistant => Some(WireMessage {
                    role: "assistant",
                    content: m.content.clone(),
                }),
                // System turns ride in the request's system field instead.
                Role::System => None,
            })
            .collect();
        messages.push(WireMessage {
            role: "user",
            content: message.to_string(),
        });
        messages
    }

    fn system_text(&self, system_prompt: &str, history: &[Message]) -> Option<String> {
        let mut parts: Vec<&str> = Vec::new();
        if !system_prompt.is_empty() {
            parts.push(system_prompt);
        }
        parts.extend(
            history
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.content.as_str()),
        );
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// One attempt against the Messages API, returning the joined text.
    async fn post_messages(&self, request: &MessagesRequest<'_>) -> Result<String, ProviderError> {
        // Expose the credential only here, at the point of use.
        let response = Self::client()
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout)
                } else {
                    ProviderError::Http(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::Auth);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|e| format!("unreadable error body: {}", e));
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

fn is_transient(error: &ProviderError) -> bool {
    match error {
        ProviderError::Http(_) => true,
        ProviderError::Timeout(_) => true,
        ProviderError::RateLimited { .. } => true,
        ProviderError::Api { status, .. } => *status >= 500,
        _ => false,
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn generate_response(
        &self,
        message: &str,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<Value, ProviderError> {
        let system = self.system_text(system_prompt, history);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: system.as_deref(),
            messages: self.wire_messages(message, history),
        };

        let text = (|| self.post_messages(&request))
            .retry(ExponentialBuilder::default().with_max_times(MAX_RETRIES))
            .when(is_transient)
            .notify(|error: &ProviderError, delay: Duration| {
                tracing::warn!(error = %error, ?delay, "transient failure, retrying");
            })
            .await?;

        // Models answering in JSON get passed through as JSON; anything
        // else is a plain text payload.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn health_check(&self) -> bool {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: 1,
            system: None,
            messages: vec![WireMessage {
                role: "user",
                content: "ping".to_string(),
            }],
        };
        self.post_messages(&request).await.is_ok()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    #[allow(dead_code)] // required for deserialization, not read directly
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Factory for config-driven construction.
///
/// Recognized configuration:
/// ```json
/// {
///   "api_key": "sk-ant-...",
///   "base_url": "https://...",
///   "model": "claude-sonnet-4-5",
///   "max_tokens": 1024
/// }
/// ```
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, config: &Value) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        Ok(Arc::new(AnthropicProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &Value) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", ANTHROPIC_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Anthropic API key required: set 'api_key' in config or {}",
                ANTHROPIC_API_KEY_ENV
            )));
        }
        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_config_overrides() {
        let provider = AnthropicProvider::from_config(&json!({
            "api_key": "sk-test",
            "base_url": "https://proxy.internal/v1",
            "model": "claude-haiku-4-5",
            "max_tokens": 256
        }))
        .unwrap();

        assert_eq!(provider.base_url, "https://proxy.internal/v1");
        assert_eq!(provider.model, "claude-haiku-4-5");
        assert_eq!(provider.max_tokens, 256);
    }

    #[test]
    fn test_debug_redacts_key() {
        let provider = AnthropicProvider::new("sk-super-secret");
        assert!(!format!("{:?}", provider).contains("sk-super-secret"));
    }

    #[test]
    fn test_factory_rejects_bad_base_url() {
        let result = AnthropicProviderFactory.validate_config(&json!({
            "api_key": "sk-test",
            "base_url": "ftp://nope"
        }));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&ProviderError::Http("reset".to_string())));
        assert!(is_transient(&ProviderError::Timeout(Duration::from_secs(1))));
        assert!(is_transient(&ProviderError::RateLimited { retry_after: None }));
        assert!(is_transient(&ProviderError::Api {
            status: 529,
            message: "overloaded".to_string()
        }));
        assert!(!is_transient(&ProviderError::Auth));
        assert!(!is_transient(&ProviderError::Api {
            status: 400,
            message: "bad request".to_string()
        }));
    }

    #[test]
    fn test_system_turns_fold_into_system_field() {
        let provider = AnthropicProvider::new("sk-test");
        let history = vec![
            Message::system("You are a budgeting assistant."),
            Message::user("hi"),
        ];
        let system = provider.system_text("Answer briefly.", &history).unwrap();
        assert!(system.contains("Answer briefly."));
        assert!(system.contains("budgeting assistant"));

        let wire = provider.wire_messages("next question", &history);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire.last().unwrap().role, "user");
    }
}
