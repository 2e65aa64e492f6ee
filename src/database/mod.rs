//! # Persistence Layer
//!
//! Storage seams for the orchestrator. [`JobStore`] owns job, task and audit
//! records; [`WorkQueue`] owns the claimable queue entries and is the sole
//! arbiter of which worker currently holds a piece of work.
//!
//! Two backends implement both traits:
//!
//! - [`memory::InMemoryStore`] - process-local, used by tests and embedded runs
//! - [`postgres::PgStore`] - PostgreSQL via `sqlx` (feature `postgres`)
//!
//! Status updates are compare-and-set: an update names the status it expects
//! the row to hold and reports `false` when another writer got there first.
//! The `*_at` variants take the clock as an argument so sweeps and leases can
//! be exercised deterministically.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod connection;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::TaskerResult;
use crate::models::{
    AnalyticsRecord, ErrorRecord, Job, NewQueueEntry, QueueEntry, Task, TaskCounts,
    UserActionRecord,
};
use crate::state_machine::{JobStatus, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

pub use memory::InMemoryStore;

#[cfg(feature = "postgres")]
pub use connection::DatabaseConnection;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Job, task and audit-trail storage
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job together with its materialized tasks
    async fn create_job(&self, job: &Job, tasks: &[Task]) -> TaskerResult<()>;

    async fn get_job(&self, job_id: Uuid) -> TaskerResult<Job>;

    async fn list_jobs_by_status(&self, status: JobStatus) -> TaskerResult<Vec<Job>>;

    /// Persist `job` if the stored row still has status `expected`
    async fn update_job(&self, job: &Job, expected: JobStatus) -> TaskerResult<bool>;

    /// Write task tallies and progress; `updated_at` advances only when a tally changed
    async fn update_job_progress(
        &self,
        job_id: Uuid,
        counts: &TaskCounts,
        now: DateTime<Utc>,
    ) -> TaskerResult<Job>;

    async fn get_task(&self, task_id: Uuid) -> TaskerResult<Task>;

    /// Tasks of a job in creation order
    async fn list_tasks(&self, job_id: Uuid) -> TaskerResult<Vec<Task>>;

    /// Persist `task` if the stored row still has status `expected`
    async fn update_task(&self, task: &Task, expected: TaskStatus) -> TaskerResult<bool>;

    async fn record_error(&self, record: &ErrorRecord) -> TaskerResult<()>;

    async fn list_errors(&self, job_id: Uuid) -> TaskerResult<Vec<ErrorRecord>>;

    async fn record_action(&self, record: &UserActionRecord) -> TaskerResult<()>;

    async fn list_actions(&self, job_id: Uuid) -> TaskerResult<Vec<UserActionRecord>>;

    /// Insert or replace the analytics record of a job
    async fn save_analytics(&self, record: &AnalyticsRecord) -> TaskerResult<()>;

    async fn get_analytics(&self, job_id: Uuid) -> TaskerResult<Option<AnalyticsRecord>>;
}

/// Durable queue of claimable work
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Add an entry; returns the existing pending entry when the task already has one
    async fn enqueue(&self, entry: NewQueueEntry) -> TaskerResult<QueueEntry>;

    async fn get_entry(&self, entry_id: Uuid) -> TaskerResult<QueueEntry>;

    async fn claim(&self, worker_id: &str) -> TaskerResult<Option<QueueEntry>> {
        self.claim_at(worker_id, Utc::now()).await
    }

    /// Atomically take the best eligible `pending` entry as of `now`
    async fn claim_at(&self, worker_id: &str, now: DateTime<Utc>)
        -> TaskerResult<Option<QueueEntry>>;

    /// Return a claimed entry to `pending`, counting the aborted attempt
    async fn release(&self, entry_id: Uuid) -> TaskerResult<()>;

    /// Return a claimed entry to `pending` for a later time without counting an attempt
    async fn defer(&self, entry_id: Uuid, scheduled_for: DateTime<Utc>) -> TaskerResult<()>;

    async fn complete(&self, entry_id: Uuid) -> TaskerResult<()>;

    async fn reclaim_stale(&self, lease: Duration) -> TaskerResult<Vec<QueueEntry>> {
        self.reclaim_stale_at(lease, Utc::now()).await
    }

    /// Release every `processing` entry claimed longer than `lease` before `now`
    async fn reclaim_stale_at(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> TaskerResult<Vec<QueueEntry>>;

    /// Complete every pending entry of a job; returns how many were dropped
    async fn cancel_for_job(&self, job_id: Uuid) -> TaskerResult<u64>;

    /// Number of `pending` entries
    async fn depth(&self) -> TaskerResult<i64>;
}

/// Lease as a signed offset; leases beyond chrono's range saturate
pub(crate) fn lease_to_chrono(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX)
}
