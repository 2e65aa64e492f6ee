//! # Queue Entry Model
//!
//! A claimable pointer to dequeuable work. Entries are the sole arbiter of which
//! worker owns a piece of work at any moment.
//!
//! ## Database Schema
//!
//! Maps to `coursegen_queue_entries`:
//! - `entry_id`: Primary key (UUID)
//! - `job_id` / `task_id`: referenced work (task is optional for job-granularity entries)
//! - `scheduled_for`: entries are invisible to `claim` until this instant
//! - `claimed_by` / `claimed_at`: set while `status = 'processing'`

use crate::state_machine::QueueEntryStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub entry_id: Uuid,
    pub job_id: Uuid,
    pub task_id: Option<Uuid>,
    pub priority: i32,
    pub scheduled_for: DateTime<Utc>,
    pub status: QueueEntryStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueEntry {
    pub job_id: Uuid,
    pub task_id: Option<Uuid>,
    pub priority: i32,
    pub scheduled_for: DateTime<Utc>,
}

impl NewQueueEntry {
    /// Entry for a task, claimable immediately
    pub fn for_task(job_id: Uuid, task_id: Uuid, priority: i32, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            task_id: Some(task_id),
            priority,
            scheduled_for: now,
        }
    }

    /// Defer visibility to claimers until `scheduled_for`
    pub fn scheduled_at(mut self, scheduled_for: DateTime<Utc>) -> Self {
        self.scheduled_for = scheduled_for;
        self
    }
}

impl QueueEntry {
    pub fn from_new(new_entry: NewQueueEntry, now: DateTime<Utc>) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            job_id: new_entry.job_id,
            task_id: new_entry.task_id,
            priority: new_entry.priority,
            scheduled_for: new_entry.scheduled_for,
            status: QueueEntryStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            retry_count: 0,
            created_at: now,
        }
    }

    /// Pending and due at `now`
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueEntryStatus::Pending && self.scheduled_for <= now
    }

    /// Processing with a claim older than `lease`
    pub fn is_stale(&self, lease: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.status == QueueEntryStatus::Processing
            && self.claimed_at.is_some_and(|claimed| now - claimed > lease)
    }
}
