//! # Circuit Breaker Configuration
//!
//! Per-breaker parameters. System-wide settings (defaults plus per-component
//! overrides) live in [`crate::config::CircuitBreakerSettings`] and are turned
//! into a [`CircuitBreakerConfig`] when a breaker is first created.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_FAILURE_THRESHOLD: u32 = 100;
const MAX_COOL_DOWN: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures recorded while closed before the circuit opens
    pub failure_threshold: u32,

    /// Cool-down after the last failure before a probe is let through
    pub timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Describe the first out-of-range parameter, if any
    pub fn validate(&self) -> Result<(), String> {
        match self.failure_threshold {
            0 => return Err("failure_threshold must be at least 1".to_string()),
            n if n > MAX_FAILURE_THRESHOLD => {
                return Err(format!(
                    "failure_threshold must not exceed {MAX_FAILURE_THRESHOLD}, got {n}"
                ))
            }
            _ => {}
        }

        if self.timeout.is_zero() || self.timeout > MAX_COOL_DOWN {
            return Err(format!(
                "timeout must be between 1 and {} seconds, got {}",
                MAX_COOL_DOWN.as_secs(),
                self.timeout.as_secs()
            ));
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
        }
    }
}
