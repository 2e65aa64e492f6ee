//! # Job Model
//!
//! One end-to-end course-generation request.
//!
//! ## Database Schema
//!
//! Maps to `coursegen_jobs`:
//! - `job_id`: Primary key (UUID)
//! - `status`: TEXT, one of `queued|processing|completed|failed|cancelled|paused`
//! - `request_payload` / `result_payload`: JSONB
//! - `total_tasks`, `completed_tasks`, `failed_tasks`, `skipped_tasks`: counters
//!   recomputed from task statuses whenever a task row is written
//!
//! Jobs are never deleted; they retire through a terminal status.

use crate::models::task::{Task, TaskSpec};
use crate::state_machine::{JobStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub owner_id: String,
    pub tenant_id: String,
    pub status: JobStatus,
    pub progress_percentage: f64,
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub failed_tasks: i32,
    pub skipped_tasks: i32,
    pub request_payload: serde_json::Value,
    pub result_payload: Option<serde_json::Value>,
    pub error_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Submission payload for a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub owner_id: String,
    pub tenant_id: String,
    pub request_payload: serde_json::Value,
    pub tasks: Vec<TaskSpec>,
}

/// Task status tallies for a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: i32,
    pub pending: i32,
    pub running: i32,
    pub completed: i32,
    pub failed: i32,
    pub skipped: i32,
    pub cancelled: i32,
}

impl TaskCounts {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            counts.total += 1;
            match task.status {
                TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Retrying => {
                    counts.pending += 1
                }
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Every task is `completed`, `skipped` or `failed`
    pub fn all_terminal(&self) -> bool {
        self.total > 0 && self.completed + self.skipped + self.failed == self.total
    }
}

/// Completion percentage of a job, two-decimal precision.
///
/// Zero tasks yields 0 rather than a division error.
pub fn calculate_job_completion_percentage(completed: i32, total: i32) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    round2(f64::from(completed) * 100.0 / f64::from(total))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Job {
    /// Build a freshly submitted job record
    pub fn new(new_job: &NewJob, now: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            owner_id: new_job.owner_id.clone(),
            tenant_id: new_job.tenant_id.clone(),
            status: JobStatus::Queued,
            progress_percentage: 0.0,
            total_tasks: new_job.tasks.len() as i32,
            completed_tasks: 0,
            failed_tasks: 0,
            skipped_tasks: 0,
            request_payload: new_job.request_payload.clone(),
            result_payload: None,
            error_summary: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Refresh counters and progress from the job's tasks
    pub fn apply_counts(&mut self, counts: &TaskCounts) {
        self.total_tasks = counts.total;
        self.completed_tasks = counts.completed;
        self.failed_tasks = counts.failed;
        self.skipped_tasks = counts.skipped;
        self.progress_percentage = calculate_job_completion_percentage(counts.completed, counts.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_completion_percentage_zero_tasks() {
        assert_eq!(calculate_job_completion_percentage(0, 0), 0.0);
    }

    #[test]
    fn test_completion_percentage_rounding() {
        assert_eq!(calculate_job_completion_percentage(2, 3), 66.67);
        assert_eq!(calculate_job_completion_percentage(1, 3), 33.33);
        assert_eq!(calculate_job_completion_percentage(5, 5), 100.0);
    }

    proptest! {
        #[test]
        fn completion_percentage_is_bounded(total in 1i32..500, completed_seed in 0i32..500) {
            let completed = completed_seed % (total + 1);
            let pct = calculate_job_completion_percentage(completed, total);
            prop_assert!((0.0..=100.0).contains(&pct));
            let exact = f64::from(completed) * 100.0 / f64::from(total);
            prop_assert!((pct - exact).abs() <= 0.005 + f64::EPSILON);
        }
    }
}
