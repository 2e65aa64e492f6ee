//! # System Constants
//!
//! Operation names used in structured job/task records, alert types, and
//! orchestration defaults.

/// Operation names attached to `JOB_OPERATION` / `TASK_OPERATION` records
pub mod events {
    pub const JOB_SUBMITTED: &str = "job.submitted";
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_CANCELLED: &str = "job.cancelled";
    pub const JOB_PAUSED: &str = "job.paused";
    pub const JOB_RESUMED: &str = "job.resumed";

    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_RETRY_SCHEDULED: &str = "task.retry_scheduled";
    pub const TASK_DEFERRED: &str = "task.deferred";
    pub const TASK_RESET: &str = "task.reset";
    pub const TASK_SKIPPED: &str = "task.skipped";
}

/// Health alert types
pub mod alerts {
    pub const STUCK_JOB: &str = "stuck_job";
    pub const STALLED_TASKS: &str = "stalled_tasks";
}

/// Queue priority for tasks that do not declare one
pub const DEFAULT_TASK_PRIORITY: i32 = 0;
