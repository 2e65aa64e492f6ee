//! # Transition Guards
//!
//! Allowed status transitions for jobs and tasks. Stores apply updates as
//! compare-and-set on the expected status; these guards decide which target
//! statuses are legal from a given source in the first place.

use super::states::{JobStatus, TaskStatus};
use crate::error::{TaskerError, TaskerResult};

/// Whether a job may move from `from` to `to`
pub fn job_transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Queued, Processing | Paused | Cancelled | Completed | Failed)
            | (Processing, Completed | Failed | Cancelled | Paused)
            | (Paused, Processing | Queued | Cancelled)
    )
}

/// Whether a task may move from `from` to `to`
///
/// `Running -> Pending` is reserved for the health monitor's orphan recovery;
/// the executor always routes failures through `Retrying` or `Failed`.
pub fn task_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Queued | Running | Skipped | Cancelled)
            | (Queued, Pending | Running | Skipped | Cancelled)
            | (Running, Completed | Failed | Retrying | Cancelled | Pending)
            | (Retrying, Queued | Running | Skipped | Cancelled)
            | (Failed, Pending | Skipped)
    )
}

pub fn ensure_job_transition(from: JobStatus, to: JobStatus) -> TaskerResult<()> {
    if job_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(TaskerError::StateTransitionError(format!(
            "job cannot move from {from} to {to}"
        )))
    }
}

pub fn ensure_task_transition(from: TaskStatus, to: TaskStatus) -> TaskerResult<()> {
    if task_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(TaskerError::StateTransitionError(format!(
            "task cannot move from {from} to {to}"
        )))
    }
}
