//! Job and task lifecycle states plus the guards deciding which transitions
//! between them are legal.

pub mod guards;
pub mod states;

pub use guards::{
    ensure_job_transition, ensure_task_transition, job_transition_allowed,
    task_transition_allowed,
};
pub use states::{JobStatus, QueueEntryStatus, TaskStatus};
