//! # Task Finalizer
//!
//! Job-level reconciliation: keeps a job's counters in step with its tasks and
//! decides when the job as a whole is finished.
//!
//! Completion may be recorded by whoever observes it (executor, recovery
//! handler, health sweep). Promotion of task failures into a `failed` job is
//! reserved for the health monitor's sweep, so task failures never escape the
//! executor's retry loop on their own.

use crate::constants::events;
use crate::database::JobStore;
use crate::error::TaskerResult;
use crate::logging::log_job_operation;
use crate::models::{Job, Task, TaskCounts};
use crate::orchestration::analytics::AnalyticsAggregator;
use crate::orchestration::error_classifier::rollup_severity;
use crate::state_machine::{ensure_job_transition, JobStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Type of finalization action taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizationAction {
    Completed,
    Failed,
    NoAction,
}

/// Which terminal transitions a caller may apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizationMode {
    /// Only record completion
    CompletionOnly,
    /// Completion and failure promotion (health sweep)
    Reconcile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizationResult {
    pub job_id: Uuid,
    pub action: FinalizationAction,
    pub counts: TaskCounts,
    pub completion_percentage: f64,
}

/// Terminal verdict for a job given its task tallies
pub fn decide_finalization(counts: &TaskCounts) -> FinalizationAction {
    if counts.total > 0 && counts.completed == counts.total {
        return FinalizationAction::Completed;
    }
    if counts.all_terminal() {
        if counts.failed > 0 {
            return FinalizationAction::Failed;
        }
        // Only completed and skipped tasks remain
        return FinalizationAction::Completed;
    }
    FinalizationAction::NoAction
}

#[derive(Clone)]
pub struct TaskFinalizer {
    store: Arc<dyn JobStore>,
    analytics: AnalyticsAggregator,
}

impl std::fmt::Debug for TaskFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFinalizer").finish_non_exhaustive()
    }
}

impl TaskFinalizer {
    pub fn new(store: Arc<dyn JobStore>, analytics: AnalyticsAggregator) -> Self {
        Self { store, analytics }
    }

    /// Recount a job's tasks and persist counters and progress
    pub async fn refresh_progress(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> TaskerResult<(Job, Vec<Task>, TaskCounts)> {
        let tasks = self.store.list_tasks(job_id).await?;
        let counts = TaskCounts::from_tasks(&tasks);
        let job = self.store.update_job_progress(job_id, &counts, now).await?;
        Ok((job, tasks, counts))
    }

    /// Refresh progress and apply any terminal transition the mode allows
    #[instrument(skip(self))]
    pub async fn finalize(
        &self,
        job_id: Uuid,
        mode: FinalizationMode,
        now: DateTime<Utc>,
    ) -> TaskerResult<FinalizationResult> {
        let (job, tasks, counts) = self.refresh_progress(job_id, now).await?;
        let no_action = FinalizationResult {
            job_id,
            action: FinalizationAction::NoAction,
            counts,
            completion_percentage: job.progress_percentage,
        };

        if !matches!(job.status, JobStatus::Queued | JobStatus::Processing) {
            return Ok(no_action);
        }

        let action = match (decide_finalization(&counts), mode) {
            (FinalizationAction::Failed, FinalizationMode::CompletionOnly) => {
                return Ok(no_action)
            }
            (FinalizationAction::NoAction, _) => return Ok(no_action),
            (action, _) => action,
        };

        let expected = job.status;
        let mut updated = job;
        updated.completed_at = Some(now);
        updated.updated_at = now;
        match action {
            FinalizationAction::Completed => {
                updated.status = JobStatus::Completed;
                updated.result_payload = Some(Self::collect_outputs(&tasks));
                updated.error_summary = None;
            }
            FinalizationAction::Failed => {
                updated.status = JobStatus::Failed;
                updated.error_summary = Some(Self::failure_summary(&tasks, &counts));
            }
            FinalizationAction::NoAction => return Ok(no_action),
        }
        ensure_job_transition(expected, updated.status)?;

        if !self.store.update_job(&updated, expected).await? {
            debug!(job_id = %job_id, "Job changed concurrently; finalization skipped");
            return Ok(no_action);
        }

        let operation = match action {
            FinalizationAction::Completed => events::JOB_COMPLETED,
            _ => events::JOB_FAILED,
        };
        log_job_operation(
            operation,
            job_id,
            updated.status.as_str(),
            updated.error_summary.as_deref(),
        );

        self.analytics.record(&updated, &tasks).await?;

        Ok(FinalizationResult {
            job_id,
            action,
            counts,
            completion_percentage: updated.progress_percentage,
        })
    }

    fn collect_outputs(tasks: &[Task]) -> serde_json::Value {
        let outputs: serde_json::Map<String, serde_json::Value> = tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .filter_map(|task| {
                task.output_payload
                    .clone()
                    .map(|output| (task.task_identifier.clone(), output))
            })
            .collect();
        serde_json::json!({ "tasks": outputs })
    }

    fn failure_summary(tasks: &[Task], counts: &TaskCounts) -> String {
        let failed: Vec<&Task> = tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
            .collect();
        let severity = rollup_severity(failed.iter().filter_map(|task| task.error_severity))
            .map(|severity| severity.as_str())
            .unwrap_or("unknown");
        let identifiers: Vec<&str> = failed
            .iter()
            .map(|task| task.task_identifier.as_str())
            .collect();
        format!(
            "{} of {} tasks failed (highest severity: {}): {}",
            counts.failed,
            counts.total,
            severity,
            identifiers.join(", ")
        )
    }
}
