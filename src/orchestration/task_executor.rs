//! # Task Executor
//!
//! Runs one claimed queue entry to an outcome.
//!
//! ## Flow
//!
//! 1. Cooperative cancellation: entries of terminal or paused jobs are dropped
//! 2. The task must still be executable and every dependency `completed|skipped`
//! 3. The task-type handler is invoked through the circuit breaker of the
//!    dependency it declares
//! 4. Success persists output and usage, then queues newly ready dependents
//! 5. Failure is classified, recorded as an error record, and either scheduled
//!    for another attempt (`retrying`) or marked `failed`
//! 6. A call the breaker rejects never reached the dependency, so it spends no
//!    retry budget: the task waits in `retrying` and its entry is deferred to
//!    the end of the breaker's cool-down
//!
//! Task failures never escape [`TaskExecutor::execute`]; an `Err` means the
//! store itself failed and the worker should release the entry.
//!
//! ## Retry Policy
//!
//! A failure is retried when `retry_count < max_retries`, the classification is
//! recoverable and its severity is below `critical`. The delay is
//! `base * 2^(retry_count - 1)` capped by configuration, or the dependency's
//! own retry-after hint when that is longer.

use crate::config::RetryConfig;
use crate::constants::events;
use crate::database::{JobStore, WorkQueue};
use crate::error::TaskerResult;
use crate::logging::{log_job_operation, log_task_operation};
use crate::models::{ErrorRecord, NewQueueEntry, QueueEntry, ResolutionOutcome, Task};
use crate::orchestration::error_classifier::{
    ErrorClassification, ErrorClassifier, ErrorContext, ErrorSeverity,
};
use crate::orchestration::task_enqueuer::TaskEnqueuer;
use crate::orchestration::task_finalizer::{FinalizationMode, TaskFinalizer};
use crate::orchestration::task_graph::TaskGraph;
use crate::orchestration::task_handler::{HandlerError, TaskContext, TaskOutput};
use crate::registry::TaskHandlerRegistry;
use crate::resilience::{CircuitBreakerError, CircuitBreakerManager};
use crate::state_machine::{ensure_task_transition, JobStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Breaker key used when no handler is registered for a task type
const UNREGISTERED_DEPENDENCY: &str = "unregistered";

/// Upper bound applied when a retry delay does not fit a timestamp offset
const MAX_RETRY_DELAY_SECS: i64 = 86_400;

/// Shortest wait before re-offering a call the breaker rejected
const MIN_DEFER_DELAY: Duration = Duration::from_millis(100);

/// What happened to a claimed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed {
        task_id: Uuid,
        enqueued_dependents: usize,
    },
    RetryScheduled {
        task_id: Uuid,
        retry_count: i32,
        run_at: DateTime<Utc>,
    },
    /// Breaker rejected the call; the claimed entry should run again at `run_at`
    Deferred { task_id: Uuid, run_at: DateTime<Utc> },
    Failed {
        task_id: Uuid,
        severity: ErrorSeverity,
    },
    /// Dependencies not yet satisfied; the task is re-queued when they are
    NotReady { task_id: Uuid },
    /// Job-granularity entry expanded into task entries
    JobExpanded { job_id: Uuid, enqueued: usize },
    /// Entry dropped without running anything
    Dropped { reason: String },
}

/// Result of offering a task to its handler
enum Invocation {
    Finished(Result<TaskOutput, HandlerError>),
    Rejected { retry_in: Duration },
}

/// Retry verdict for a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fail,
}

/// Apply the retry policy to a task's current attempt
pub fn decide_retry(
    task: &Task,
    classification: &ErrorClassification,
    retry: &RetryConfig,
) -> RetryDecision {
    let retryable = task.retry_count < task.max_retries
        && classification.recoverable
        && classification.severity != ErrorSeverity::Critical;
    if !retryable {
        return RetryDecision::Fail;
    }

    let backoff = retry.backoff(task.retry_count + 1);
    let delay = classification
        .retry_after
        .map_or(backoff, |hint| hint.max(backoff));
    RetryDecision::Retry { delay }
}

#[derive(Clone)]
pub struct TaskExecutor {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    registry: Arc<TaskHandlerRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    classifier: Arc<dyn ErrorClassifier>,
    enqueuer: TaskEnqueuer,
    finalizer: TaskFinalizer,
    retry: RetryConfig,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("registry", &self.registry)
            .field("classifier", &self.classifier.classifier_name())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        registry: Arc<TaskHandlerRegistry>,
        breakers: Arc<CircuitBreakerManager>,
        classifier: Arc<dyn ErrorClassifier>,
        enqueuer: TaskEnqueuer,
        finalizer: TaskFinalizer,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            breakers,
            classifier,
            enqueuer,
            finalizer,
            retry,
        }
    }

    /// Execute the work behind a claimed entry
    #[instrument(skip(self, entry), fields(entry_id = %entry.entry_id, job_id = %entry.job_id))]
    pub async fn execute(&self, entry: &QueueEntry) -> TaskerResult<ExecutionOutcome> {
        let job = self.store.get_job(entry.job_id).await?;
        if job.status.is_terminal() || job.status == JobStatus::Paused {
            debug!(status = %job.status, "Job no longer accepts work; dropping entry");
            return Ok(ExecutionOutcome::Dropped {
                reason: format!("job is {}", job.status),
            });
        }

        let Some(task_id) = entry.task_id else {
            let enqueued = self.enqueuer.enqueue_ready(job.job_id, Utc::now()).await?;
            return Ok(ExecutionOutcome::JobExpanded {
                job_id: job.job_id,
                enqueued: enqueued.len(),
            });
        };

        let task = self.store.get_task(task_id).await?;
        if !task.status.is_executable() {
            debug!(task_id = %task_id, status = %task.status, "Task not executable; dropping entry");
            return Ok(ExecutionOutcome::Dropped {
                reason: format!("task is {}", task.status),
            });
        }

        let tasks = self.store.list_tasks(job.job_id).await?;
        let graph = TaskGraph::new(&tasks);
        if !graph.is_ready(&task) {
            debug!(task_id = %task_id, "Dependencies not satisfied; waiting for them");
            return Ok(ExecutionOutcome::NotReady { task_id });
        }
        let dependency_outputs = graph.dependency_outputs(&task);

        let Some(task) = self.mark_running(task).await? else {
            return Ok(ExecutionOutcome::Dropped {
                reason: "task changed before it could start".to_string(),
            });
        };
        self.mark_job_started(job.job_id).await?;

        let context = TaskContext {
            job_id: job.job_id,
            task_id: task.task_id,
            task_identifier: task.task_identifier.clone(),
            task_type: task.task_type,
            attempt: task.retry_count + 1,
            input: task.input_payload.clone(),
            job_request: job.request_payload.clone(),
            dependency_outputs,
        };

        let started = Instant::now();
        let (dependency_name, invocation) = self.invoke(context).await;
        let elapsed = started.elapsed();

        match invocation {
            Invocation::Finished(Ok(output)) => self.handle_success(task, output).await,
            Invocation::Finished(Err(error)) => {
                self.handle_failure(task, &dependency_name, &error, elapsed)
                    .await
            }
            Invocation::Rejected { retry_in } => {
                self.handle_rejection(task, &dependency_name, retry_in)
                    .await
            }
        }
    }

    /// Resolve the handler and call it through its dependency's breaker
    async fn invoke(&self, context: TaskContext) -> (String, Invocation) {
        let Some(handler) = self.registry.resolve(context.task_type) else {
            return (
                UNREGISTERED_DEPENDENCY.to_string(),
                Invocation::Finished(Err(HandlerError::Internal(format!(
                    "no handler registered for task type {}",
                    context.task_type
                )))),
            );
        };
        let dependency = handler.dependency_name().to_string();

        if !self.breakers.is_enabled() {
            return (dependency, Invocation::Finished(handler.execute(context).await));
        }

        let breaker = self.breakers.get_circuit_breaker(&dependency);
        let invocation = match breaker.call(|| handler.execute(context)).await {
            Ok(output) => Invocation::Finished(Ok(output)),
            Err(CircuitBreakerError::OperationFailed(error)) => Invocation::Finished(Err(error)),
            Err(CircuitBreakerError::CircuitOpen { retry_in, .. }) => {
                Invocation::Rejected { retry_in }
            }
        };
        (dependency, invocation)
    }

    async fn mark_running(&self, mut task: Task) -> TaskerResult<Option<Task>> {
        let expected = task.status;
        ensure_task_transition(expected, TaskStatus::Running)?;

        let now = Utc::now();
        task.status = TaskStatus::Running;
        task.started_at = Some(now);
        task.completed_at = None;
        if !self.store.update_task(&task, expected).await? {
            return Ok(None);
        }

        log_task_operation(
            events::TASK_STARTED,
            task.job_id,
            task.task_id,
            &task.task_identifier,
            task.status.as_str(),
            None,
        );
        self.finalizer.refresh_progress(task.job_id, now).await?;
        Ok(Some(task))
    }

    /// First running task moves the job from `queued` to `processing`
    async fn mark_job_started(&self, job_id: Uuid) -> TaskerResult<()> {
        let mut job = self.store.get_job(job_id).await?;
        if job.status != JobStatus::Queued {
            return Ok(());
        }
        let now = Utc::now();
        job.status = JobStatus::Processing;
        job.started_at.get_or_insert(now);
        job.updated_at = now;
        if self.store.update_job(&job, JobStatus::Queued).await? {
            log_job_operation(events::JOB_STARTED, job_id, job.status.as_str(), None);
        }
        Ok(())
    }

    async fn handle_success(&self, mut task: Task, output: TaskOutput) -> TaskerResult<ExecutionOutcome> {
        let now = Utc::now();
        task.status = TaskStatus::Completed;
        task.output_payload = Some(output.payload);
        task.usage += output.usage;
        task.completed_at = Some(now);
        task.clear_error();

        if !self.store.update_task(&task, TaskStatus::Running).await? {
            warn!(
                task_id = %task.task_id,
                "Task changed while running (cancelled or recovered); discarding result"
            );
            return Ok(ExecutionOutcome::Dropped {
                reason: "task changed while running".to_string(),
            });
        }

        log_task_operation(
            events::TASK_COMPLETED,
            task.job_id,
            task.task_id,
            &task.task_identifier,
            task.status.as_str(),
            None,
        );

        let enqueued = self
            .enqueuer
            .enqueue_dependents(task.job_id, &task.task_identifier, now)
            .await?;
        self.finalizer
            .finalize(task.job_id, FinalizationMode::CompletionOnly, now)
            .await?;

        Ok(ExecutionOutcome::Completed {
            task_id: task.task_id,
            enqueued_dependents: enqueued.len(),
        })
    }

    /// Put a task whose call was rejected back to `retrying` without counting an attempt
    async fn handle_rejection(
        &self,
        mut task: Task,
        dependency_name: &str,
        retry_in: Duration,
    ) -> TaskerResult<ExecutionOutcome> {
        let now = Utc::now();
        let error = HandlerError::CircuitOpen {
            dependency: dependency_name.to_string(),
        };
        let context = ErrorContext {
            job_id: task.job_id,
            task_id: task.task_id,
            task_identifier: task.task_identifier.clone(),
            task_type: task.task_type,
            attempt_number: (task.retry_count + 1).max(1) as u32,
            max_attempts: (task.max_retries + 1).max(1) as u32,
            dependency_name: dependency_name.to_string(),
            execution_duration: Duration::ZERO,
            metadata: HashMap::new(),
        };
        let classification = self.classifier.classify(&error, &context);

        let delay = chrono::Duration::from_std(retry_in.max(MIN_DEFER_DELAY))
            .unwrap_or_else(|_| chrono::Duration::seconds(MAX_RETRY_DELAY_SECS));
        let run_at = now + delay;

        task.record_error(&classification);
        task.status = TaskStatus::Retrying;
        if !self.store.update_task(&task, TaskStatus::Running).await? {
            warn!(
                task_id = %task.task_id,
                "Task changed while waiting on its breaker; dropping entry"
            );
            return Ok(ExecutionOutcome::Dropped {
                reason: "task changed while running".to_string(),
            });
        }

        self.store
            .record_error(&ErrorRecord::from_classification(
                task.job_id,
                Some(task.task_id),
                &classification,
                task.retry_count,
                ResolutionOutcome::Deferred,
                now,
            ))
            .await?;

        info!(
            task_id = %task.task_id,
            dependency = %dependency_name,
            retry_count = task.retry_count,
            run_at = %run_at,
            "⏸️ Circuit open; task deferred until cool-down ends"
        );
        log_task_operation(
            events::TASK_DEFERRED,
            task.job_id,
            task.task_id,
            &task.task_identifier,
            task.status.as_str(),
            Some(&classification.message),
        );

        self.finalizer.refresh_progress(task.job_id, now).await?;
        Ok(ExecutionOutcome::Deferred {
            task_id: task.task_id,
            run_at,
        })
    }

    async fn handle_failure(
        &self,
        mut task: Task,
        dependency_name: &str,
        error: &HandlerError,
        elapsed: Duration,
    ) -> TaskerResult<ExecutionOutcome> {
        let now = Utc::now();
        let context = ErrorContext {
            job_id: task.job_id,
            task_id: task.task_id,
            task_identifier: task.task_identifier.clone(),
            task_type: task.task_type,
            attempt_number: (task.retry_count + 1).max(1) as u32,
            max_attempts: (task.max_retries + 1).max(1) as u32,
            dependency_name: dependency_name.to_string(),
            execution_duration: elapsed,
            metadata: HashMap::new(),
        };
        let classification = self.classifier.classify(error, &context);
        let decision = decide_retry(&task, &classification, &self.retry);

        task.record_error(&classification);
        let outcome = match decision {
            RetryDecision::Retry { delay } => {
                task.status = TaskStatus::Retrying;
                task.retry_count += 1;
                task.last_retry_at = Some(now);
                let run_at = now
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(MAX_RETRY_DELAY_SECS));
                ExecutionOutcome::RetryScheduled {
                    task_id: task.task_id,
                    retry_count: task.retry_count,
                    run_at,
                }
            }
            RetryDecision::Fail => {
                task.status = TaskStatus::Failed;
                task.completed_at = Some(now);
                ExecutionOutcome::Failed {
                    task_id: task.task_id,
                    severity: classification.severity,
                }
            }
        };

        let resolution = match outcome {
            ExecutionOutcome::RetryScheduled { .. } => ResolutionOutcome::Retrying,
            _ => ResolutionOutcome::Failed,
        };
        self.store
            .record_error(&ErrorRecord::from_classification(
                task.job_id,
                Some(task.task_id),
                &classification,
                task.retry_count,
                resolution,
                now,
            ))
            .await?;

        if !self.store.update_task(&task, TaskStatus::Running).await? {
            warn!(
                task_id = %task.task_id,
                "Task changed while running (cancelled or recovered); failure recorded only"
            );
            return Ok(ExecutionOutcome::Dropped {
                reason: "task changed while running".to_string(),
            });
        }

        match &outcome {
            ExecutionOutcome::RetryScheduled { run_at, retry_count, .. } => {
                self.queue
                    .enqueue(
                        NewQueueEntry::for_task(task.job_id, task.task_id, task.priority, now)
                            .scheduled_at(*run_at),
                    )
                    .await?;
                info!(
                    task_id = %task.task_id,
                    retry_count,
                    max_retries = task.max_retries,
                    error_type = %classification.error_type,
                    run_at = %run_at,
                    "🔁 Task retry scheduled"
                );
                log_task_operation(
                    events::TASK_RETRY_SCHEDULED,
                    task.job_id,
                    task.task_id,
                    &task.task_identifier,
                    task.status.as_str(),
                    Some(&classification.message),
                );
            }
            _ => {
                warn!(
                    task_id = %task.task_id,
                    severity = %classification.severity,
                    category = %classification.category,
                    error_type = %classification.error_type,
                    attempts = task.retry_count + 1,
                    "❌ Task failed"
                );
                log_task_operation(
                    events::TASK_FAILED,
                    task.job_id,
                    task.task_id,
                    &task.task_identifier,
                    task.status.as_str(),
                    Some(&classification.message),
                );
            }
        }

        self.finalizer.refresh_progress(task.job_id, now).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskSpec, TaskType};
    use crate::orchestration::error_classifier::ErrorCategory;

    fn classification(severity: ErrorSeverity, recoverable: bool) -> ErrorClassification {
        ErrorClassification {
            category: ErrorCategory::ExternalDependency,
            severity,
            recoverable,
            error_type: "TEST".to_string(),
            message: "boom".to_string(),
            suggestions: vec![],
            retry_after: None,
            context: serde_json::json!({}),
        }
    }

    fn task(retry_count: i32, max_retries: i32) -> Task {
        let spec = TaskSpec::new("t", TaskType::LessonSection).with_max_retries(max_retries);
        let mut task = Task::from_spec(Uuid::new_v4(), &spec, 0, 3, Utc::now());
        task.retry_count = retry_count;
        task
    }

    fn retry_config() -> RetryConfig {
        RetryConfig {
            default_max_retries: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        }
    }

    #[test]
    fn test_retry_until_budget_exhausted() {
        let recoverable = classification(ErrorSeverity::Medium, true);
        assert_eq!(
            decide_retry(&task(0, 2), &recoverable, &retry_config()),
            RetryDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            decide_retry(&task(1, 2), &recoverable, &retry_config()),
            RetryDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(
            decide_retry(&task(2, 2), &recoverable, &retry_config()),
            RetryDecision::Fail
        );
    }

    #[test]
    fn test_critical_and_unrecoverable_never_retry() {
        let critical = classification(ErrorSeverity::Critical, true);
        assert_eq!(
            decide_retry(&task(0, 5), &critical, &retry_config()),
            RetryDecision::Fail
        );

        let unrecoverable = classification(ErrorSeverity::Medium, false);
        assert_eq!(
            decide_retry(&task(0, 5), &unrecoverable, &retry_config()),
            RetryDecision::Fail
        );
    }

    #[test]
    fn test_retry_after_hint_extends_backoff() {
        let mut rate_limited = classification(ErrorSeverity::Medium, true);
        rate_limited.retry_after = Some(Duration::from_secs(30));
        assert_eq!(
            decide_retry(&task(0, 3), &rate_limited, &retry_config()),
            RetryDecision::Retry {
                delay: Duration::from_secs(30)
            }
        );
    }
}
