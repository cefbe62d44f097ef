//! Service status derivation and orchestrator events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resilience::CircuitState;

/// Overall service condition, reflecting which path answered last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Primary provider answering normally.
    Healthy,
    /// Answering via the fallback provider.
    Degraded,
    /// Answering from similar cached responses only.
    Limited,
    /// Answering from the emergency pool only.
    Unavailable,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Healthy => write!(f, "healthy"),
            ServiceState::Degraded => write!(f, "degraded"),
            ServiceState::Limited => write!(f, "limited"),
            ServiceState::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Point-in-time service status.
///
/// Derived from the live circuit state on demand; never stored, never a
/// source of truth.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub circuit_state: CircuitState,
    pub health_percentage: u8,
    pub last_error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Events published by the orchestrator. A closed set, not free-form names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorEvent {
    CircuitStateChanged {
        from: CircuitState,
        to: CircuitState,
    },
    StateChanged {
        from: ServiceState,
        to: ServiceState,
    },
}

pub(crate) fn health_percentage(circuit: CircuitState) -> u8 {
    match circuit {
        CircuitState::Closed => 100,
        CircuitState::HalfOpen => 50,
        CircuitState::Open => 0,
    }
}
