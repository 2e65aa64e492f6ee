//! # Orchestration Engine
//!
//! Job lifecycle from submission to finalization.
//!
//! ## Core Components
//!
//! - **OrchestrationCore**: bootstrap and public entry points (submit, status, recovery, sweep)
//! - **CoursePlanner**: decomposes a course request into the standard task pipeline
//! - **TaskGraph**: readiness queries and submission-time graph validation
//! - **TaskEnqueuer**: turns readiness into queue entries
//! - **TaskExecutor**: runs one claimed entry through handler, breaker and retry policy
//! - **ErrorClassifier**: maps handler failures onto the failure taxonomy
//! - **TaskFinalizer**: keeps job counters current and applies terminal transitions
//! - **HealthMonitor**: periodic sweep for stuck jobs, stalled tasks and expired leases
//! - **RecoveryHandler**: audited operator actions
//! - **AnalyticsAggregator**: per-job timing, success and cost summaries
//! - **WorkerPool**: claim → execute → complete loops
//!
//! ```text
//! submit_job ──▶ TaskEnqueuer ──▶ WorkQueue ──▶ WorkerPool ──▶ TaskExecutor
//!                     ▲                                          │
//!                     └──────── dependents / retries ◀───────────┤
//!                                                                ▼
//!                      HealthMonitor ──▶ TaskFinalizer ──▶ AnalyticsAggregator
//! ```

pub mod analytics;
pub mod core;
pub mod error_classifier;
pub mod health_monitor;
pub mod planner;
pub mod recovery;
pub mod task_enqueuer;
pub mod task_executor;
pub mod task_finalizer;
pub mod task_graph;
pub mod task_handler;
pub mod worker_pool;

pub use analytics::AnalyticsAggregator;
pub use core::{JobStatusView, OrchestrationCore, TaskStatusView};
pub use error_classifier::{
    ErrorCategory, ErrorClassification, ErrorClassifier, ErrorContext, ErrorSeverity,
    StandardErrorClassifier,
};
pub use health_monitor::{AlertSeverity, HealthAlert, HealthMonitor, SweepReport};
pub use planner::{CoursePlanner, PlannerConfig};
pub use recovery::{ActionResult, RecoveryHandler, RecoveryRequest};
pub use task_enqueuer::TaskEnqueuer;
pub use task_executor::{decide_retry, ExecutionOutcome, RetryDecision, TaskExecutor};
pub use task_finalizer::{
    decide_finalization, FinalizationAction, FinalizationMode, FinalizationResult, TaskFinalizer,
};
pub use task_graph::{validate_task_specs, TaskGraph};
pub use task_handler::{HandlerError, TaskContext, TaskHandler, TaskOutput};
pub use worker_pool::WorkerPool;
