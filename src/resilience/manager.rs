//! # Circuit Breaker Manager
//!
//! Per-process registry of circuit breakers keyed by external dependency name.
//! Breakers are created lazily on first use with the component override from
//! configuration, falling back to the default settings. Every worker task of a
//! process shares the same registry, so a provider outage trips one breaker for
//! all of them.

use crate::config::CircuitBreakerSettings;
use crate::resilience::{BreakerRegistrySnapshot, CircuitBreaker, CircuitBreakerMetrics};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    settings: CircuitBreakerSettings,
}

impl CircuitBreakerManager {
    pub fn from_settings(settings: &CircuitBreakerSettings) -> Self {
        info!(
            enabled = settings.enabled,
            component_overrides = settings.components.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            breakers: DashMap::new(),
            settings: settings.clone(),
        }
    }

    /// Whether handler calls are routed through breakers at all
    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Breaker for `dependency`, created on first use
    pub fn get_circuit_breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(dependency) {
            return Arc::clone(breaker.value());
        }

        // The entry lock makes creation race-free between workers
        let breaker = self
            .breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                info!(component = dependency, "Created new circuit breaker");
                Arc::new(CircuitBreaker::new(
                    dependency.to_string(),
                    self.settings.config_for_component(dependency),
                ))
            });
        Arc::clone(breaker.value())
    }

    /// Dependency names with a breaker, sorted
    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn get_component_metrics(&self, dependency: &str) -> Option<CircuitBreakerMetrics> {
        self.breakers.get(dependency).map(|breaker| breaker.metrics())
    }

    pub fn snapshot(&self) -> BreakerRegistrySnapshot {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect()
    }

    /// Emergency stop for every known provider
    pub fn force_open_all(&self) {
        warn!(breakers = self.breakers.len(), "🚨 Forcing all circuit breakers open");
        for entry in self.breakers.iter() {
            entry.value().force_open();
        }
    }

    pub fn force_close_all(&self) {
        warn!(breakers = self.breakers.len(), "🚨 Forcing all circuit breakers closed");
        for entry in self.breakers.iter() {
            entry.value().force_closed();
        }
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::from_settings(&CircuitBreakerSettings::default())
    }
}
