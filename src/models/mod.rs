//! # Models
//!
//! Records persisted by the orchestrator. Storage lives behind the
//! [`crate::database`] traits; these types carry no database handles.

pub mod analytics;
pub mod error_record;
pub mod job;
pub mod queue_entry;
pub mod task;
pub mod user_action;

pub use analytics::{AnalyticsRecord, TaskTypeSample};
pub use error_record::{ErrorRecord, ResolutionOutcome};
pub use job::{calculate_job_completion_percentage, Job, NewJob, TaskCounts};
pub use queue_entry::{NewQueueEntry, QueueEntry};
pub use task::{Task, TaskSpec, TaskType, TaskUsage};
pub use user_action::{ActionType, UserActionRecord};
