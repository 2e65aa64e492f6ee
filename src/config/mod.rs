//! # Orchestrator Configuration
//!
//! Typed configuration for the course-generation orchestrator. Every section
//! has working defaults so the orchestrator can be embedded without a config
//! file; deployments override values through a TOML file and
//! `COURSEGEN__SECTION__KEY` environment variables (see [`ConfigManager`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use coursegen_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let lease = manager.config().queue.lease();
//! let retries = manager.config().retry.default_max_retries;
//! # Ok(())
//! # }
//! ```

pub mod loader;

use crate::error::{TaskerError, TaskerResult};
use crate::resilience::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub circuit_breakers: CircuitBreakerSettings,
    pub health: HealthConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; falls back to `DATABASE_URL` when empty
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn resolved_url(&self) -> TaskerResult<String> {
        if !self.url.is_empty() {
            return Ok(self.url.clone());
        }
        std::env::var("DATABASE_URL").map_err(|_| {
            TaskerError::ConfigurationError(
                "database.url is empty and DATABASE_URL is not set".to_string(),
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Claims older than this are reclaimable
    pub lease_seconds: u64,
    /// Idle worker sleep between empty claims
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_seconds: 300,
            poll_interval_ms: 500,
        }
    }
}

impl QueueConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Used when a task does not declare its own budget
    pub default_max_retries: i32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 300_000,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `retry_count + 1`: `base * 2^(retry_count - 1)`, capped
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.saturating_sub(1).clamp(0, 32) as u32;
        let delay_ms = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.backoff_max_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Failure threshold and cool-down for one breaker
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BreakerThresholds {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 60,
        }
    }
}

impl BreakerThresholds {
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub default: BreakerThresholds,
    /// Overrides keyed by external dependency name
    pub components: HashMap<String, BreakerThresholds>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default: BreakerThresholds::default(),
            components: HashMap::new(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerConfig {
        self.components
            .get(component_name)
            .unwrap_or(&self.default)
            .to_resilience_config()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// A processing job untouched for this long is stuck
    pub stuck_threshold_seconds: u64,
    /// A running task older than this is stalled
    pub stalled_threshold_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_seconds: 1_800,
            stalled_threshold_seconds: 600,
            sweep_interval_seconds: 120,
        }
    }
}

/// Longest lease, threshold or sweep interval accepted by validation (30 days)
pub const MAX_DURATION_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Seconds as a signed offset, saturating instead of wrapping
fn seconds_to_chrono(seconds: u64) -> chrono::Duration {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl HealthConfig {
    pub fn stuck_threshold(&self) -> chrono::Duration {
        seconds_to_chrono(self.stuck_threshold_seconds)
    }

    pub fn stalled_threshold(&self) -> chrono::Duration {
        seconds_to_chrono(self.stalled_threshold_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub id_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            id_prefix: "coursegen-worker".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> TaskerResult<()> {
        let invalid = |message: &str| Err(TaskerError::ConfigurationError(message.to_string()));

        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be greater than 0");
        }
        if self.queue.lease_seconds == 0 {
            return invalid("queue.lease_seconds must be greater than 0");
        }
        if self.queue.lease_seconds > MAX_DURATION_SECONDS {
            return invalid("queue.lease_seconds must not exceed 30 days");
        }
        if self.queue.poll_interval_ms == 0 {
            return invalid("queue.poll_interval_ms must be greater than 0");
        }
        if self.retry.default_max_retries < 0 {
            return invalid("retry.default_max_retries must not be negative");
        }
        if self.retry.backoff_base_ms == 0 {
            return invalid("retry.backoff_base_ms must be greater than 0");
        }
        if self.retry.backoff_max_ms < self.retry.backoff_base_ms {
            return invalid("retry.backoff_max_ms must be at least retry.backoff_base_ms");
        }
        if self.health.stalled_threshold_seconds == 0 {
            return invalid("health.stalled_threshold_seconds must be greater than 0");
        }
        if self.health.stuck_threshold_seconds < self.health.stalled_threshold_seconds {
            return invalid(
                "health.stuck_threshold_seconds must be at least health.stalled_threshold_seconds",
            );
        }
        if self.health.stuck_threshold_seconds > MAX_DURATION_SECONDS {
            return invalid("health.stuck_threshold_seconds must not exceed 30 days");
        }
        if self.health.sweep_interval_seconds == 0 {
            return invalid("health.sweep_interval_seconds must be greater than 0");
        }
        if self.health.sweep_interval_seconds > MAX_DURATION_SECONDS {
            return invalid("health.sweep_interval_seconds must not exceed 30 days");
        }
        if self.workers.count == 0 {
            return invalid("workers.count must be greater than 0");
        }

        let breakers = std::iter::once(("default", &self.circuit_breakers.default)).chain(
            self.circuit_breakers
                .components
                .iter()
                .map(|(name, thresholds)| (name.as_str(), thresholds)),
        );
        for (name, thresholds) in breakers {
            thresholds
                .to_resilience_config()
                .validate()
                .map_err(|reason| {
                    TaskerError::ConfigurationError(format!(
                        "circuit_breakers.{name}: {reason}"
                    ))
                })?;
        }

        Ok(())
    }
}
