#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # CourseGen Core
//!
//! Durable job orchestration for multi-step AI course generation.
//!
//! ## Overview
//!
//! A course request becomes a **job**: a dependency graph of **tasks**
//! (knowledge analysis, outline, lesson sections, assessment, validation). Tasks
//! are queued as claimable entries and executed by a pool of workers that call
//! injected content handlers through per-dependency circuit breakers. Failures
//! are classified, recorded and retried with exponential backoff; a periodic
//! health sweep recovers stalled work and finalizes jobs.
//!
//! ## Module Organization
//!
//! - [`models`] - Jobs, tasks, queue entries and audit records
//! - [`database`] - Storage traits with in-memory and PostgreSQL backends
//! - [`state_machine`] - Job/task statuses and allowed transitions
//! - [`orchestration`] - Executor, enqueuer, finalizer, health monitor, recovery
//! - [`resilience`] - Circuit breakers keyed by external dependency
//! - [`registry`] - Task type → handler registry
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup and canonical records
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coursegen_core::config::OrchestratorConfig;
//! use coursegen_core::orchestration::OrchestrationCore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! coursegen_core::logging::init_structured_logging();
//!
//! let core = OrchestrationCore::in_memory(OrchestratorConfig::default())?;
//! // core.task_handler_registry.register(Arc::new(MyOutlineHandler::new()));
//!
//! let workers = core.worker_pool();
//! workers.start()?;
//! let job_id = core
//!     .submit_course_request("owner-1", "tenant-1", serde_json::json!({"lesson_count": 4}))
//!     .await?;
//! println!("submitted {job_id}");
//! workers.stop(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib                 # Unit tests
//! cargo test                       # Unit and integration tests (in-memory store)
//! cargo test -- --ignored          # PostgreSQL store tests (needs DATABASE_URL)
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod resilience;
pub mod state_machine;

pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{TaskerError, TaskerResult};
pub use models::{Job, NewJob, Task, TaskSpec, TaskType};
pub use orchestration::OrchestrationCore;
pub use state_machine::{JobStatus, TaskStatus};
