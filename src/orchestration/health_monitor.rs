//! # Health Monitor
//!
//! Periodic reconciliation of `processing` jobs. A sweep:
//!
//! 1. Returns expired queue leases to `pending` so crashed workers' entries are
//!    picked up again
//! 2. Flags jobs without progress for longer than the stuck threshold, resets
//!    their stalled `running` tasks to `pending` and re-enqueues them
//! 3. Warns about stalled tasks of jobs that are otherwise moving
//! 4. Promotes jobs whose tasks are all terminal to `completed` or `failed`
//!
//! Sweeps are idempotent and never reopen a terminal job. Alerts are returned
//! in the [`SweepReport`] and emitted as structured `HEALTH_ALERT` events.

use crate::config::HealthConfig;
use crate::constants::{alerts, events};
use crate::database::{JobStore, WorkQueue};
use crate::error::TaskerResult;
use crate::logging::{log_alert, log_task_operation};
use crate::models::{Job, Task, TaskCounts};
use crate::orchestration::task_enqueuer::TaskEnqueuer;
use crate::orchestration::task_finalizer::{
    decide_finalization, FinalizationAction, FinalizationMode, TaskFinalizer,
};
use crate::state_machine::{ensure_task_transition, JobStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub job_id: Uuid,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub message: String,
    /// Stalled tasks behind the alert
    pub task_ids: Vec<Uuid>,
    pub raised_at: DateTime<Utc>,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub jobs_checked: usize,
    pub completed_jobs: Vec<Uuid>,
    pub failed_jobs: Vec<Uuid>,
    pub reset_tasks: Vec<Uuid>,
    pub reclaimed_entries: usize,
    pub alerts: Vec<HealthAlert>,
}

impl SweepReport {
    pub fn has_critical_alerts(&self) -> bool {
        self.alerts
            .iter()
            .any(|alert| alert.severity == AlertSeverity::Critical)
    }
}

#[derive(Clone)]
pub struct HealthMonitor {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    enqueuer: TaskEnqueuer,
    finalizer: TaskFinalizer,
    health: HealthConfig,
    lease: Duration,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("health", &self.health)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        enqueuer: TaskEnqueuer,
        finalizer: TaskFinalizer,
        health: HealthConfig,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            enqueuer,
            finalizer,
            health,
            lease,
        }
    }

    pub async fn sweep(&self) -> TaskerResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep as of `now`
    #[instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> TaskerResult<SweepReport> {
        let mut report = SweepReport {
            reclaimed_entries: self.queue.reclaim_stale_at(self.lease, now).await?.len(),
            ..Default::default()
        };

        for job in self.store.list_jobs_by_status(JobStatus::Processing).await? {
            report.jobs_checked += 1;
            self.check_job(job, now, &mut report).await?;
        }

        info!(
            jobs_checked = report.jobs_checked,
            completed = report.completed_jobs.len(),
            failed = report.failed_jobs.len(),
            reset_tasks = report.reset_tasks.len(),
            reclaimed_entries = report.reclaimed_entries,
            alerts = report.alerts.len(),
            "Health sweep finished"
        );
        Ok(report)
    }

    async fn check_job(
        &self,
        job: Job,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> TaskerResult<()> {
        let tasks = self.store.list_tasks(job.job_id).await?;
        let counts = TaskCounts::from_tasks(&tasks);

        // Jobs about to finalize are not stuck, they are done
        if decide_finalization(&counts) == FinalizationAction::NoAction {
            let stalled: Vec<&Task> = tasks
                .iter()
                .filter(|task| self.is_stalled(task, now))
                .collect();

            if now - last_activity(&job, &tasks) > self.health.stuck_threshold() {
                let alert = self.recover_stuck_job(&job, &stalled, now, report).await?;
                report.alerts.push(alert);
            } else if !stalled.is_empty() {
                let alert = HealthAlert {
                    job_id: job.job_id,
                    alert_type: alerts::STALLED_TASKS.to_string(),
                    severity: AlertSeverity::Warning,
                    message: format!(
                        "{} task(s) running longer than {}s: {}",
                        stalled.len(),
                        self.health.stalled_threshold_seconds,
                        identifiers(&stalled)
                    ),
                    task_ids: stalled.iter().map(|task| task.task_id).collect(),
                    raised_at: now,
                };
                log_alert(
                    &alert.alert_type,
                    alert.severity.as_str(),
                    alert.job_id,
                    &alert.message,
                );
                report.alerts.push(alert);
            }
        }

        let result = self
            .finalizer
            .finalize(job.job_id, FinalizationMode::Reconcile, now)
            .await?;
        match result.action {
            FinalizationAction::Completed => report.completed_jobs.push(job.job_id),
            FinalizationAction::Failed => report.failed_jobs.push(job.job_id),
            FinalizationAction::NoAction => {}
        }
        Ok(())
    }

    async fn recover_stuck_job(
        &self,
        job: &Job,
        stalled: &[&Task],
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> TaskerResult<HealthAlert> {
        let mut reset = Vec::with_capacity(stalled.len());
        for task in stalled {
            if self.reset_task(task).await? {
                reset.push(task.task_id);
            }
        }
        let requeued = self.enqueuer.enqueue_ready(job.job_id, now).await?;

        let alert = HealthAlert {
            job_id: job.job_id,
            alert_type: alerts::STUCK_JOB.to_string(),
            severity: AlertSeverity::Critical,
            message: format!(
                "Job {} made no progress for over {}s; reset {} stalled task(s), re-enqueued {}",
                job.job_id,
                self.health.stuck_threshold_seconds,
                reset.len(),
                requeued.len()
            ),
            task_ids: reset.clone(),
            raised_at: now,
        };
        log_alert(
            &alert.alert_type,
            alert.severity.as_str(),
            alert.job_id,
            &alert.message,
        );
        report.reset_tasks.extend(reset);
        Ok(alert)
    }

    /// Put a stalled `running` task back to `pending`
    async fn reset_task(&self, task: &Task) -> TaskerResult<bool> {
        ensure_task_transition(TaskStatus::Running, TaskStatus::Pending)?;
        let mut reset = task.clone();
        reset.status = TaskStatus::Pending;
        reset.started_at = None;
        reset.queued_at = None;

        if !self.store.update_task(&reset, TaskStatus::Running).await? {
            warn!(task_id = %task.task_id, "Stalled task changed before it could be reset");
            return Ok(false);
        }
        log_task_operation(
            events::TASK_RESET,
            reset.job_id,
            reset.task_id,
            &reset.task_identifier,
            reset.status.as_str(),
            Some("stalled task reset by health monitor"),
        );
        Ok(true)
    }

    fn is_stalled(&self, task: &Task, now: DateTime<Utc>) -> bool {
        task.status == TaskStatus::Running
            && task
                .started_at
                .is_some_and(|started| now - started > self.health.stalled_threshold())
    }
}

/// Most recent sign of life for a job: its own update or any task timestamp
fn last_activity(job: &Job, tasks: &[Task]) -> DateTime<Utc> {
    tasks
        .iter()
        .flat_map(|task| {
            [
                task.queued_at,
                task.started_at,
                task.completed_at,
                task.last_retry_at,
            ]
        })
        .flatten()
        .fold(job.updated_at, |latest, at| latest.max(at))
}

fn identifiers(tasks: &[&Task]) -> String {
    tasks
        .iter()
        .map(|task| task.task_identifier.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewJob, TaskSpec, TaskType};
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_last_activity_prefers_latest_task_timestamp() {
        let created = Utc::now() - ChronoDuration::hours(2);
        let new_job = NewJob {
            owner_id: "owner".into(),
            tenant_id: "tenant".into(),
            request_payload: serde_json::json!({}),
            tasks: vec![TaskSpec::new("analysis", TaskType::KnowledgeAnalysis)],
        };
        let job = Job::new(&new_job, created);
        let mut task = Task::from_spec(job.job_id, &new_job.tasks[0], 0, 3, created);
        assert_eq!(last_activity(&job, std::slice::from_ref(&task)), created);

        let started = created + ChronoDuration::minutes(90);
        task.started_at = Some(started);
        assert_eq!(last_activity(&job, &[task]), started);
    }

    #[test]
    fn test_alert_severity_names() {
        assert_eq!(AlertSeverity::Warning.to_string(), "warning");
        assert_eq!(AlertSeverity::Critical.to_string(), "critical");
    }
}
