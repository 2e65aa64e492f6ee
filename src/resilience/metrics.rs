//! # Circuit Breaker Metrics
//!
//! Point-in-time counters of breaker activity, reported in logs and usable by
//! health checks. Rejected calls never reach the provider and are counted
//! apart from failures.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Failure rate above which a closed breaker is reported as degraded
pub const DEGRADED_FAILURE_RATE: f64 = 0.1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Calls that reached the protected operation
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Calls refused without invoking the operation
    pub rejected_count: u64,
    /// Failures counted toward the threshold since the breaker last closed
    pub current_failures: u64,
    pub total_duration: Duration,
    pub current_state: CircuitState,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// `failure_count / total_calls`, 0 before the first call
    pub failure_rate: f64,
    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    /// Open breakers are unhealthy; a closed one is unhealthy once degraded.
    /// A half-open breaker is mid-probe and counts as healthy.
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < DEGRADED_FAILURE_RATE,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }
}

/// Metrics of every breaker in a registry, keyed by dependency name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerRegistrySnapshot {
    pub breakers: BTreeMap<String, CircuitBreakerMetrics>,
}

impl FromIterator<(String, CircuitBreakerMetrics)> for BreakerRegistrySnapshot {
    fn from_iter<I: IntoIterator<Item = (String, CircuitBreakerMetrics)>>(iter: I) -> Self {
        Self {
            breakers: iter.into_iter().collect(),
        }
    }
}

impl BreakerRegistrySnapshot {
    /// Dependencies whose breaker currently rejects calls, sorted
    pub fn open_circuits(&self) -> Vec<&str> {
        self.breakers
            .iter()
            .filter(|(_, metrics)| metrics.current_state == CircuitState::Open)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Fraction of healthy breakers; 1.0 for an empty registry
    pub fn health_score(&self) -> f64 {
        if self.breakers.is_empty() {
            return 1.0;
        }
        let healthy = self.breakers.values().filter(|m| m.is_healthy()).count();
        healthy as f64 / self.breakers.len() as f64
    }
}
