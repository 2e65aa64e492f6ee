//! # Orchestration Core
//!
//! Single bootstrap path for the orchestrator. Every entry point (embedded
//! use, the CLI, tests) builds one [`OrchestrationCore`] from an
//! [`OrchestratorConfig`] and a storage backend; the core wires the queue,
//! executor, health monitor, recovery handler and analytics on top of it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use coursegen_core::config::OrchestratorConfig;
//! use coursegen_core::orchestration::OrchestrationCore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let core = OrchestrationCore::in_memory(OrchestratorConfig::default())?;
//! let job_id = core
//!     .submit_course_request("owner-1", "tenant-1", serde_json::json!({"lesson_count": 3}))
//!     .await?;
//! let status = core.job_status(job_id).await?;
//! println!("{} is {}", job_id, status.job.status);
//! # Ok(())
//! # }
//! ```

use crate::config::OrchestratorConfig;
use crate::constants::events;
use crate::database::{InMemoryStore, JobStore, WorkQueue};
use crate::error::{TaskerError, TaskerResult};
use crate::logging::log_job_operation;
use crate::models::{
    AnalyticsRecord, ErrorRecord, Job, NewJob, Task, TaskType, UserActionRecord,
};
use crate::orchestration::analytics::AnalyticsAggregator;
use crate::orchestration::error_classifier::{ErrorClassifier, ErrorSeverity, StandardErrorClassifier};
use crate::orchestration::health_monitor::{HealthMonitor, SweepReport};
use crate::orchestration::planner::CoursePlanner;
use crate::orchestration::recovery::{ActionResult, RecoveryHandler, RecoveryRequest};
use crate::orchestration::task_enqueuer::TaskEnqueuer;
use crate::orchestration::task_executor::TaskExecutor;
use crate::orchestration::task_finalizer::TaskFinalizer;
use crate::orchestration::task_graph::validate_task_specs;
use crate::orchestration::worker_pool::WorkerPool;
use crate::registry::TaskHandlerRegistry;
use crate::resilience::CircuitBreakerManager;
use crate::state_machine::TaskStatus;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Per-task line of a job status view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: Uuid,
    pub task_identifier: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub error_severity: Option<ErrorSeverity>,
}

impl From<&Task> for TaskStatusView {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            task_identifier: task.task_identifier.clone(),
            task_type: task.task_type,
            status: task.status,
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            error_message: task.error_message.clone(),
            error_severity: task.error_severity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job: Job,
    pub tasks: Vec<TaskStatusView>,
}

impl JobStatusView {
    pub fn progress_percentage(&self) -> f64 {
        self.job.progress_percentage
    }
}

/// Orchestrator components bound to one storage backend
pub struct OrchestrationCore {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,

    /// Task handler registry
    pub task_handler_registry: Arc<TaskHandlerRegistry>,

    /// Per-process breaker registry shared by every worker
    pub circuit_breaker_manager: Arc<CircuitBreakerManager>,

    planner: CoursePlanner,
    enqueuer: TaskEnqueuer,
    analytics: AnalyticsAggregator,
    executor: TaskExecutor,
    health_monitor: HealthMonitor,
    recovery: RecoveryHandler,
}

impl std::fmt::Debug for OrchestrationCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationCore")
            .field("config", &self.config)
            .field("task_handler_registry", &self.task_handler_registry)
            .finish_non_exhaustive()
    }
}

impl OrchestrationCore {
    /// Wire the orchestrator over explicit store and queue backends
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> TaskerResult<Self> {
        Self::with_classifier(config, store, queue, Arc::new(StandardErrorClassifier::new()))
    }

    /// Same as [`OrchestrationCore::new`] with a custom failure classifier
    pub fn with_classifier(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> TaskerResult<Self> {
        config.validate()?;

        let task_handler_registry = Arc::new(TaskHandlerRegistry::new());
        let circuit_breaker_manager = Arc::new(CircuitBreakerManager::from_settings(
            &config.circuit_breakers,
        ));
        let enqueuer = TaskEnqueuer::new(store.clone(), queue.clone());
        let analytics = AnalyticsAggregator::new(store.clone());
        let finalizer = TaskFinalizer::new(store.clone(), analytics.clone());
        let executor = TaskExecutor::new(
            store.clone(),
            queue.clone(),
            task_handler_registry.clone(),
            circuit_breaker_manager.clone(),
            classifier,
            enqueuer.clone(),
            finalizer.clone(),
            config.retry.clone(),
        );
        let health_monitor = HealthMonitor::new(
            store.clone(),
            queue.clone(),
            enqueuer.clone(),
            finalizer.clone(),
            config.health.clone(),
            config.queue.lease(),
        );
        let recovery = RecoveryHandler::new(store.clone(), queue.clone(), enqueuer.clone(), finalizer);

        info!(
            workers = config.workers.count,
            circuit_breakers_enabled = config.circuit_breakers.enabled,
            "🔧 OrchestrationCore initialized"
        );

        Ok(Self {
            config,
            store,
            queue,
            task_handler_registry,
            circuit_breaker_manager,
            planner: CoursePlanner::default(),
            enqueuer,
            analytics,
            executor,
            health_monitor,
            recovery,
        })
    }

    /// Orchestrator over a fresh process-local store
    pub fn in_memory(config: OrchestratorConfig) -> TaskerResult<Self> {
        let store = Arc::new(InMemoryStore::new());
        Self::new(config, store.clone(), store)
    }

    /// Orchestrator over PostgreSQL; connects and applies pending migrations
    #[cfg(feature = "postgres")]
    pub async fn connect(config: OrchestratorConfig) -> TaskerResult<Self> {
        let connection = crate::database::DatabaseConnection::connect(&config.database).await?;
        connection.migrate().await?;
        let store = Arc::new(crate::database::PgStore::new(connection.pool().clone()));
        Self::new(config, store.clone(), store)
    }

    pub fn with_planner(mut self, planner: CoursePlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health_monitor
    }

    pub fn queue(&self) -> Arc<dyn WorkQueue> {
        self.queue.clone()
    }

    /// Store a job with its tasks and enqueue the root tasks
    #[instrument(skip(self, new_job), fields(owner_id = %new_job.owner_id, tasks = new_job.tasks.len()))]
    pub async fn submit_job(&self, new_job: NewJob) -> TaskerResult<Uuid> {
        if new_job.tasks.is_empty() {
            return Err(TaskerError::ValidationError(
                "a job needs at least one task".to_string(),
            ));
        }
        validate_task_specs(&new_job.tasks)?;

        let now = Utc::now();
        let job = Job::new(&new_job, now);
        let tasks: Vec<Task> = new_job
            .tasks
            .iter()
            .enumerate()
            .map(|(sequence, spec)| {
                Task::from_spec(
                    job.job_id,
                    spec,
                    sequence as i32,
                    self.config.retry.default_max_retries,
                    now,
                )
            })
            .collect();

        self.store.create_job(&job, &tasks).await?;
        let enqueued = self.enqueuer.enqueue_ready(job.job_id, now).await?;

        log_job_operation(
            events::JOB_SUBMITTED,
            job.job_id,
            job.status.as_str(),
            Some(&format!(
                "{} task(s), {} enqueued",
                tasks.len(),
                enqueued.len()
            )),
        );
        Ok(job.job_id)
    }

    /// Decompose a course request with the planner and submit it
    pub async fn submit_course_request(
        &self,
        owner_id: &str,
        tenant_id: &str,
        request: serde_json::Value,
    ) -> TaskerResult<Uuid> {
        let tasks = self.planner.plan(&request)?;
        self.submit_job(NewJob {
            owner_id: owner_id.to_string(),
            tenant_id: tenant_id.to_string(),
            request_payload: request,
            tasks,
        })
        .await
    }

    pub async fn job_status(&self, job_id: Uuid) -> TaskerResult<JobStatusView> {
        let job = self.store.get_job(job_id).await?;
        let tasks = self.store.list_tasks(job_id).await?;
        Ok(JobStatusView {
            job,
            tasks: tasks.iter().map(TaskStatusView::from).collect(),
        })
    }

    pub async fn job_errors(&self, job_id: Uuid) -> TaskerResult<Vec<ErrorRecord>> {
        self.store.get_job(job_id).await?;
        self.store.list_errors(job_id).await
    }

    pub async fn job_actions(&self, job_id: Uuid) -> TaskerResult<Vec<UserActionRecord>> {
        self.store.get_job(job_id).await?;
        self.store.list_actions(job_id).await
    }

    /// Stored analytics of a finished job, or a live summary for a running one
    pub async fn job_analytics(&self, job_id: Uuid) -> TaskerResult<AnalyticsRecord> {
        match self.store.get_analytics(job_id).await? {
            Some(record) => Ok(record),
            None => self.analytics.summarize_job(job_id).await,
        }
    }

    pub async fn apply_recovery(&self, request: RecoveryRequest) -> TaskerResult<ActionResult> {
        self.recovery.apply(request).await
    }

    pub async fn sweep(&self) -> TaskerResult<SweepReport> {
        self.health_monitor.sweep().await
    }

    /// Worker pool sized from configuration; call [`WorkerPool::start`] to run it
    pub fn worker_pool(&self) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(
            self.queue.clone(),
            self.executor.clone(),
            self.config.workers.clone(),
            self.config.queue.poll_interval(),
        ))
    }
}
