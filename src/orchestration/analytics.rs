//! # Analytics Aggregator
//!
//! Derives per-job timing, success-rate and cost figures from task records.
//! Summaries are pure functions of the job and its tasks: they can be
//! recomputed at any time and never touch job or task state.

use crate::database::JobStore;
use crate::error::TaskerResult;
use crate::models::job::round2;
use crate::models::{AnalyticsRecord, Job, Task, TaskTypeSample, TaskUsage};
use crate::state_machine::TaskStatus;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

fn secs(duration: chrono::Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

#[derive(Clone)]
pub struct AnalyticsAggregator {
    store: Arc<dyn JobStore>,
}

impl std::fmt::Debug for AnalyticsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsAggregator").finish_non_exhaustive()
    }
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Summarize a job from its tasks
    ///
    /// Total task time is the sum of terminal task durations; wall-clock time
    /// is reported separately once the job has both a start and an end.
    pub fn summarize(job: &Job, tasks: &[Task], now: DateTime<Utc>) -> AnalyticsRecord {
        let mut total_task_time_secs = 0.0;
        let mut timed_tasks = 0u32;
        let mut completed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut total_retries = 0;
        let mut usage = TaskUsage::default();
        let mut samples: BTreeMap<_, TaskTypeSample> = BTreeMap::new();

        for task in tasks {
            let sample = samples.entry(task.task_type).or_default();
            sample.task_count += 1;
            sample.usage += task.usage;
            usage += task.usage;
            total_retries += task.retry_count;

            match task.status {
                TaskStatus::Completed => {
                    completed += 1;
                    sample.completed += 1;
                }
                TaskStatus::Failed => failed += 1,
                TaskStatus::Skipped => skipped += 1,
                _ => {}
            }

            if task.status.is_terminal() {
                if let Some(duration) = task.duration() {
                    let duration_secs = secs(duration);
                    total_task_time_secs += duration_secs;
                    sample.total_duration_secs += duration_secs;
                    timed_tasks += 1;
                }
            }
        }

        let total_tasks = tasks.len() as i32;
        let success_rate = if total_tasks == 0 {
            0.0
        } else {
            round2(f64::from(completed) * 100.0 / f64::from(total_tasks))
        };
        let average_task_duration_secs = if timed_tasks == 0 {
            0.0
        } else {
            total_task_time_secs / f64::from(timed_tasks)
        };
        let wall_clock_secs = match (job.started_at, job.completed_at) {
            (Some(start), Some(end)) if end >= start => Some(secs(end - start)),
            _ => None,
        };

        AnalyticsRecord {
            job_id: job.job_id,
            total_task_time_secs,
            wall_clock_secs,
            average_task_duration_secs,
            total_tasks,
            completed_tasks: completed,
            failed_tasks: failed,
            skipped_tasks: skipped,
            success_rate,
            total_retries,
            usage,
            samples,
            computed_at: now,
        }
    }

    /// Recompute a job's summary from storage without persisting it
    pub async fn summarize_job(&self, job_id: Uuid) -> TaskerResult<AnalyticsRecord> {
        let job = self.store.get_job(job_id).await?;
        let tasks = self.store.list_tasks(job_id).await?;
        Ok(Self::summarize(&job, &tasks, Utc::now()))
    }

    /// Compute and store a job's summary, replacing any earlier one
    #[instrument(skip(self, job, tasks), fields(job_id = %job.job_id))]
    pub async fn record(&self, job: &Job, tasks: &[Task]) -> TaskerResult<AnalyticsRecord> {
        let record = Self::summarize(job, tasks, Utc::now());
        self.store.save_analytics(&record).await?;
        debug!(
            success_rate = record.success_rate,
            total_task_time_secs = record.total_task_time_secs,
            estimated_cost = record.usage.estimated_cost,
            "Stored job analytics"
        );
        Ok(record)
    }
}
