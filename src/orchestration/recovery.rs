//! # Recovery Handler
//!
//! Operator interventions on a job: retrying or skipping tasks, cancelling,
//! patching task inputs, and pausing or resuming the job.
//!
//! Every request is validated against the whole target set before anything
//! changes, so a request naming one ineligible task changes nothing. Each
//! invocation, rejected ones included, is appended to the job's user-action
//! audit trail.

use crate::constants::events;
use crate::database::{JobStore, WorkQueue};
use crate::error::TaskerResult;
use crate::logging::{log_job_operation, log_task_operation};
use crate::models::{ActionType, Job, Task, UserActionRecord};
use crate::orchestration::task_enqueuer::TaskEnqueuer;
use crate::orchestration::task_finalizer::{FinalizationMode, TaskFinalizer};
use crate::state_machine::{ensure_job_transition, ensure_task_transition, JobStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub job_id: Uuid,
    pub actor: String,
    pub action: ActionType,
    #[serde(default)]
    pub task_ids: Vec<Uuid>,
    /// JSON object merged into task inputs by `modify_config`
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

impl RecoveryRequest {
    pub fn new(job_id: Uuid, actor: impl Into<String>, action: ActionType) -> Self {
        Self {
            job_id,
            actor: actor.into(),
            action,
            task_ids: Vec::new(),
            config: None,
        }
    }

    pub fn with_tasks(mut self, task_ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.task_ids = task_ids.into_iter().collect();
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    /// Tasks whose status or input changed
    pub affected: Vec<Uuid>,
}

impl ActionResult {
    fn applied(message: impl Into<String>, affected: Vec<Uuid>) -> Self {
        Self {
            success: true,
            message: message.into(),
            affected,
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            affected: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct RecoveryHandler {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    enqueuer: TaskEnqueuer,
    finalizer: TaskFinalizer,
}

impl std::fmt::Debug for RecoveryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryHandler").finish_non_exhaustive()
    }
}

impl RecoveryHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        enqueuer: TaskEnqueuer,
        finalizer: TaskFinalizer,
    ) -> Self {
        Self {
            store,
            queue,
            enqueuer,
            finalizer,
        }
    }

    /// Apply an operator request and record it in the audit trail
    ///
    /// A rejected request returns `Ok` with `success = false`; `Err` is
    /// reserved for unknown jobs and storage faults.
    #[instrument(skip(self, request), fields(job_id = %request.job_id, action = %request.action))]
    pub async fn apply(&self, request: RecoveryRequest) -> TaskerResult<ActionResult> {
        let job = self.store.get_job(request.job_id).await?;
        let now = Utc::now();

        let result = if job.status.is_terminal() {
            ActionResult::rejected(format!(
                "job {} is {} and accepts no further actions",
                job.job_id, job.status
            ))
        } else {
            match request.action {
                ActionType::RetryTask => self.retry_tasks(&job, &request, now).await?,
                ActionType::SkipTask => self.skip_tasks(&job, &request, now).await?,
                ActionType::CancelJob => self.cancel_job(job.clone(), now).await?,
                ActionType::ModifyConfig => self.modify_config(&job, &request).await?,
                ActionType::PauseJob => self.pause_job(job.clone(), now).await?,
                ActionType::ResumeJob => self.resume_job(job.clone(), now).await?,
            }
        };

        self.store
            .record_action(&UserActionRecord {
                action_id: Uuid::new_v4(),
                job_id: job.job_id,
                actor: request.actor.clone(),
                action_type: request.action,
                task_ids: request.task_ids.clone(),
                success: result.success,
                message: result.message.clone(),
                created_at: now,
            })
            .await?;

        info!(
            actor = %request.actor,
            success = result.success,
            affected = result.affected.len(),
            message = %result.message,
            "Recovery action processed"
        );
        Ok(result)
    }

    /// Resolve the named tasks, rejecting unknown ids and tasks that fail `eligible`
    async fn targets<F>(
        &self,
        job: &Job,
        request: &RecoveryRequest,
        eligible: F,
    ) -> TaskerResult<Result<Vec<Task>, String>>
    where
        F: Fn(&Task) -> Option<String>,
    {
        if request.task_ids.is_empty() {
            return Ok(Err(format!("{} requires at least one task id", request.action)));
        }

        let tasks: HashMap<Uuid, Task> = self
            .store
            .list_tasks(job.job_id)
            .await?
            .into_iter()
            .map(|task| (task.task_id, task))
            .collect();

        let mut targets = Vec::with_capacity(request.task_ids.len());
        for task_id in &request.task_ids {
            let Some(task) = tasks.get(task_id) else {
                return Ok(Err(format!("task {task_id} does not belong to job {}", job.job_id)));
            };
            if let Some(reason) = eligible(task) {
                return Ok(Err(format!("task {} {reason}", task.task_identifier)));
            }
            if !targets.iter().any(|t: &Task| t.task_id == *task_id) {
                targets.push(task.clone());
            }
        }
        Ok(Ok(targets))
    }

    async fn retry_tasks(
        &self,
        job: &Job,
        request: &RecoveryRequest,
        now: DateTime<Utc>,
    ) -> TaskerResult<ActionResult> {
        let targets = self
            .targets(job, request, |task| {
                if task.status != TaskStatus::Failed {
                    Some(format!("is {}, only failed tasks can be retried", task.status))
                } else if !task.is_recoverable() {
                    Some("failed with a non-recoverable error".to_string())
                } else {
                    None
                }
            })
            .await?;
        let targets = match targets {
            Ok(targets) => targets,
            Err(reason) => return Ok(ActionResult::rejected(reason)),
        };

        let mut affected = Vec::with_capacity(targets.len());
        for mut task in targets {
            ensure_task_transition(TaskStatus::Failed, TaskStatus::Pending)?;
            task.status = TaskStatus::Pending;
            task.started_at = None;
            task.completed_at = None;
            task.queued_at = None;
            task.clear_error();
            if self.store.update_task(&task, TaskStatus::Failed).await? {
                log_task_operation(
                    events::TASK_RESET,
                    task.job_id,
                    task.task_id,
                    &task.task_identifier,
                    task.status.as_str(),
                    Some("retry requested by operator"),
                );
                affected.push(task.task_id);
            }
        }

        if job.status.accepts_work() {
            self.enqueuer.enqueue_ready(job.job_id, now).await?;
        }
        self.finalizer.refresh_progress(job.job_id, now).await?;
        Ok(ActionResult::applied(
            format!("{} task(s) reset for retry", affected.len()),
            affected,
        ))
    }

    async fn skip_tasks(
        &self,
        job: &Job,
        request: &RecoveryRequest,
        now: DateTime<Utc>,
    ) -> TaskerResult<ActionResult> {
        let targets = self
            .targets(job, request, |task| match task.status {
                TaskStatus::Running
                | TaskStatus::Completed
                | TaskStatus::Skipped
                | TaskStatus::Cancelled => Some(format!("is {} and cannot be skipped", task.status)),
                _ => None,
            })
            .await?;
        let targets = match targets {
            Ok(targets) => targets,
            Err(reason) => return Ok(ActionResult::rejected(reason)),
        };

        let mut affected = Vec::with_capacity(targets.len());
        for mut task in targets {
            let expected = task.status;
            ensure_task_transition(expected, TaskStatus::Skipped)?;
            task.status = TaskStatus::Skipped;
            task.completed_at = Some(now);
            if self.store.update_task(&task, expected).await? {
                log_task_operation(
                    events::TASK_SKIPPED,
                    task.job_id,
                    task.task_id,
                    &task.task_identifier,
                    task.status.as_str(),
                    Some("skipped by operator"),
                );
                affected.push(task.task_id);
                if job.status.accepts_work() {
                    self.enqueuer
                        .enqueue_dependents(job.job_id, &task.task_identifier, now)
                        .await?;
                }
            }
        }

        self.finalizer
            .finalize(job.job_id, FinalizationMode::CompletionOnly, now)
            .await?;
        Ok(ActionResult::applied(
            format!("{} task(s) skipped", affected.len()),
            affected,
        ))
    }

    async fn cancel_job(&self, mut job: Job, now: DateTime<Utc>) -> TaskerResult<ActionResult> {
        let expected = job.status;
        ensure_job_transition(expected, JobStatus::Cancelled)?;
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(now);
        job.updated_at = now;
        if !self.store.update_job(&job, expected).await? {
            return Ok(ActionResult::rejected(
                "job changed while cancelling; retry the request",
            ));
        }

        let mut affected = Vec::new();
        for mut task in self.store.list_tasks(job.job_id).await? {
            if task.status.is_terminal() {
                continue;
            }
            let task_expected = task.status;
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(now);
            if self.store.update_task(&task, task_expected).await? {
                affected.push(task.task_id);
            }
        }
        let dropped = self.queue.cancel_for_job(job.job_id).await?;
        self.finalizer.refresh_progress(job.job_id, now).await?;

        log_job_operation(
            events::JOB_CANCELLED,
            job.job_id,
            job.status.as_str(),
            Some(&format!(
                "{} task(s) cancelled, {dropped} queue entries dropped",
                affected.len()
            )),
        );
        Ok(ActionResult::applied(
            format!("job cancelled; {} task(s) cancelled", affected.len()),
            affected,
        ))
    }

    async fn modify_config(
        &self,
        job: &Job,
        request: &RecoveryRequest,
    ) -> TaskerResult<ActionResult> {
        let Some(serde_json::Value::Object(patch)) = &request.config else {
            return Ok(ActionResult::rejected(
                "modify_config requires a JSON object config",
            ));
        };
        let targets = self
            .targets(job, request, |task| {
                (task.status.is_terminal() || task.status == TaskStatus::Running)
                    .then(|| format!("is {} and cannot be reconfigured", task.status))
            })
            .await?;
        let targets = match targets {
            Ok(targets) => targets,
            Err(reason) => return Ok(ActionResult::rejected(reason)),
        };

        let mut affected = Vec::with_capacity(targets.len());
        for mut task in targets {
            let mut input = match std::mem::take(&mut task.input_payload) {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            for (key, value) in patch {
                input.insert(key.clone(), value.clone());
            }
            task.input_payload = serde_json::Value::Object(input);
            if self.store.update_task(&task, task.status).await? {
                affected.push(task.task_id);
            }
        }
        Ok(ActionResult::applied(
            format!("configuration updated on {} task(s)", affected.len()),
            affected,
        ))
    }

    async fn pause_job(&self, mut job: Job, now: DateTime<Utc>) -> TaskerResult<ActionResult> {
        if !job.status.accepts_work() {
            return Ok(ActionResult::rejected(format!(
                "job is {} and cannot be paused",
                job.status
            )));
        }
        let expected = job.status;
        ensure_job_transition(expected, JobStatus::Paused)?;
        job.status = JobStatus::Paused;
        job.updated_at = now;
        if !self.store.update_job(&job, expected).await? {
            return Ok(ActionResult::rejected("job changed while pausing"));
        }
        log_job_operation(events::JOB_PAUSED, job.job_id, job.status.as_str(), None);
        Ok(ActionResult::applied("job paused", Vec::new()))
    }

    async fn resume_job(&self, mut job: Job, now: DateTime<Utc>) -> TaskerResult<ActionResult> {
        if job.status != JobStatus::Paused {
            return Ok(ActionResult::rejected(format!(
                "job is {} and is not paused",
                job.status
            )));
        }
        let target = if job.started_at.is_some() {
            JobStatus::Processing
        } else {
            JobStatus::Queued
        };
        ensure_job_transition(JobStatus::Paused, target)?;
        job.status = target;
        job.updated_at = now;
        if !self.store.update_job(&job, JobStatus::Paused).await? {
            return Ok(ActionResult::rejected("job changed while resuming"));
        }

        let requeued = self.enqueuer.requeue_job(job.job_id, now).await?;
        log_job_operation(
            events::JOB_RESUMED,
            job.job_id,
            job.status.as_str(),
            Some(&format!("{} task(s) re-enqueued", requeued.len())),
        );
        Ok(ActionResult::applied(
            format!("job resumed; {} task(s) re-enqueued", requeued.len()),
            requeued,
        ))
    }
}
