//! # Resilience Module
//!
//! Fault isolation for calls to external dependencies (generation-model
//! providers and similar). One circuit breaker exists per dependency name; a
//! failing provider trips its own breaker and fails fast instead of burning the
//! retry budgets of every task that calls it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use coursegen_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     timeout: Duration::from_secs(30),
//! };
//!
//! let breaker = CircuitBreaker::new("content_model".to_string(), config);
//! let outline = breaker
//!     .call(|| async { Ok::<_, std::io::Error>("outline") })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{BreakerRegistrySnapshot, CircuitBreakerMetrics};
