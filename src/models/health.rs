use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::circuit_breaker::{CircuitSnapshot, CircuitState};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of probing one infrastructure dependency (cache, database, broker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    pub fn reachable(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            error: None,
        }
    }

    pub fn unreachable(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            error: Some(error),
        }
    }
}

/// Live state of one delivery or collaborator circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerHealth {
    pub status: HealthStatus,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

impl From<CircuitSnapshot> for BreakerHealth {
    /// Anything but a closed breaker means calls to that dependency are
    /// currently being refused or trialled.
    fn from(snapshot: CircuitSnapshot) -> Self {
        let status = match snapshot.state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen | CircuitState::Open => HealthStatus::Degraded,
        };

        Self {
            status,
            state: snapshot.state,
            consecutive_failures: snapshot.consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub dependencies: HashMap<String, DependencyHealth>,
    pub circuit_breakers: HashMap<String, BreakerHealth>,
}

impl HealthReport {
    /// The overall status is the worst of all individual ones.
    pub fn new(
        dependencies: HashMap<String, DependencyHealth>,
        circuit_breakers: HashMap<String, BreakerHealth>,
    ) -> Self {
        let status = dependencies
            .values()
            .map(|d| d.status)
            .chain(circuit_breakers.values().map(|b| b.status))
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            timestamp: Utc::now(),
            dependencies,
            circuit_breakers,
        }
    }
}
