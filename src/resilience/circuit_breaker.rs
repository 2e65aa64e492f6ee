//! # Circuit Breaker Implementation
//!
//! Classic three-state breaker guarding one external dependency:
//! Closed (normal operation), Open (failing fast), Half-Open (single probe).
//!
//! - Every failure while closed counts toward `failure_threshold`; reaching it
//!   opens the circuit and stamps the failure time. Successes while closed do
//!   not reset the count.
//! - While open, calls are rejected without touching the dependency.
//! - Once `timeout` has elapsed since the last failure, exactly one caller is
//!   let through as a probe (the circuit is then half-open); everyone else keeps
//!   failing fast until the probe resolves.
//! - Probe success closes the circuit and clears the count; probe failure
//!   re-opens it and restarts the cool-down.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    #[default]
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single probe call is in flight
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen {
        component: String,
        /// Time until the breaker lets a probe through
        retry_in: Duration,
    },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// How a call was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

#[derive(Debug)]
struct BreakerInner {
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    probe_started: Option<Instant>,
    metrics: CircuitBreakerMetrics,
}

/// Circuit breaker for one named dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,

    /// Mirror of the current state for lock-free reads; written under `inner`
    state: AtomicU8,

    config: CircuitBreakerConfig,

    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_seconds = config.timeout.as_secs(),
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            inner: Mutex::new(BreakerInner {
                failure_count: 0,
                last_failure: None,
                last_failure_at: None,
                probe_started: None,
                metrics: CircuitBreakerMetrics::default(),
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self
            .admit()
            .map_err(|retry_in| CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
                retry_in,
            })?;

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(admission, duration),
            Err(_) => self.record_failure(admission, duration),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether a call may proceed, moving open -> half-open when due.
    ///
    /// A rejection carries the time left until a probe would be admitted.
    fn admit(&self) -> Result<Admission, Duration> {
        let mut inner = self.inner.lock();
        let remaining = |since: Option<Instant>| {
            since.map_or(Duration::ZERO, |at| self.config.timeout.saturating_sub(at.elapsed()))
        };
        let admission = match self.state() {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => match remaining(inner.last_failure) {
                wait if wait.is_zero() => {
                    self.set_state(CircuitState::HalfOpen);
                    inner.probe_started = Some(Instant::now());
                    info!(component = %self.name, "🟡 Circuit breaker half-open (probing recovery)");
                    Ok(Admission::Probe)
                }
                wait => Err(wait),
            },
            // A probe abandoned mid-flight must not wedge the breaker forever.
            CircuitState::HalfOpen => match remaining(inner.probe_started) {
                wait if wait.is_zero() => {
                    inner.probe_started = Some(Instant::now());
                    Ok(Admission::Probe)
                }
                wait => Err(wait),
            },
        };

        if let Err(wait) = admission {
            inner.metrics.rejected_count += 1;
            debug!(
                component = %self.name,
                retry_in_ms = wait.as_millis() as u64,
                "Circuit breaker rejected call"
            );
        }
        admission
    }

    fn record_success(&self, admission: Admission, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.total_duration += duration;

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "🟢 Operation succeeded"
        );

        if admission == Admission::Probe && self.state() == CircuitState::HalfOpen {
            inner.failure_count = 0;
            inner.probe_started = None;
            self.set_state(CircuitState::Closed);
            info!(
                component = %self.name,
                total_calls = inner.metrics.total_calls,
                "🟢 Circuit breaker closed (recovered)"
            );
        }
    }

    fn record_failure(&self, admission: Admission, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.total_duration += duration;

        let now = Instant::now();
        match (admission, self.state()) {
            (Admission::Probe, CircuitState::HalfOpen) => {
                inner.last_failure = Some(now);
                inner.last_failure_at = Some(Utc::now());
                inner.probe_started = None;
                self.set_state(CircuitState::Open);
                error!(
                    component = %self.name,
                    timeout_seconds = self.config.timeout.as_secs(),
                    "🔴 Circuit breaker probe failed, re-opened"
                );
            }
            (Admission::Normal, CircuitState::Closed) => {
                inner.failure_count += 1;
                inner.last_failure = Some(now);
                inner.last_failure_at = Some(Utc::now());
                warn!(
                    component = %self.name,
                    failures = inner.failure_count,
                    failure_threshold = self.config.failure_threshold,
                    duration_ms = duration.as_millis() as u64,
                    "🔴 Operation failed"
                );
                if inner.failure_count >= self.config.failure_threshold {
                    self.set_state(CircuitState::Open);
                    error!(
                        component = %self.name,
                        failures = inner.failure_count,
                        timeout_seconds = self.config.timeout.as_secs(),
                        "🔴 Circuit breaker opened (failing fast)"
                    );
                }
            }
            // Calls admitted before another caller tripped the circuit.
            _ => {}
        }
    }

    fn set_state(&self, state: CircuitState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        inner.probe_started = None;
        self.set_state(CircuitState::Open);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.probe_started = None;
        self.set_state(CircuitState::Closed);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let mut snapshot = inner.metrics.clone();
        snapshot.current_state = self.state();
        snapshot.current_failures = u64::from(inner.failure_count);
        snapshot.last_failure_at = inner.last_failure_at;

        if inner.metrics.total_calls > 0 {
            snapshot.failure_rate =
                inner.metrics.failure_count as f64 / inner.metrics.total_calls as f64;
            snapshot.average_duration =
                inner.metrics.total_duration / inner.metrics.total_calls as u32;
        }

        snapshot
    }

    pub fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }
}
