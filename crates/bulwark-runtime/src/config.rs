//! Runtime configuration.
//!
//! All knobs have working defaults; a zero-config orchestrator is valid.
//! Configs load from YAML, with durations accepted either as integer
//! seconds or as humantime strings ("30s", "5m", "1h").

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::resilience::CircuitBreakerConfig;

/// Errors from configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Response cache settings.
    pub cache: CacheConfig,

    /// Circuit breaker settings for the primary provider.
    pub circuit_breaker: CircuitBreakerConfig,

    /// How often the background health probe runs.
    #[serde(with = "duration_str")]
    pub health_check_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from YAML text and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Reject configurations that indicate a wiring bug.
    ///
    /// These are the only failures this library surfaces as real errors;
    /// everything at request time degrades instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }
        if !(self.cache.similarity_threshold > 0.0 && self.cache.similarity_threshold <= 1.0) {
            return Err(ConfigError::Invalid(
                "cache.similarity_threshold must be in (0, 1]".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker.reset_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "circuit_breaker.reset_timeout must be non-zero".to_string(),
            ));
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "health_check_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// serde helper: durations as humantime strings or integer seconds.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => humantime::parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}
