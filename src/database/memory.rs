//! # In-Memory Store
//!
//! Process-local implementation of [`JobStore`] and [`WorkQueue`]. All state
//! sits behind one mutex, so every operation (claims in particular) is atomic
//! with respect to every other, mirroring the single-statement guarantees of
//! the PostgreSQL backend.

use super::{lease_to_chrono, JobStore, WorkQueue};
use crate::error::{TaskerError, TaskerResult};
use crate::models::{
    AnalyticsRecord, ErrorRecord, Job, NewQueueEntry, QueueEntry, Task, TaskCounts,
    UserActionRecord,
};
use crate::state_machine::{JobStatus, QueueEntryStatus, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    tasks: HashMap<Uuid, Task>,
    /// Insertion order doubles as the creation-order tie-break
    entries: Vec<QueueEntry>,
    errors: Vec<ErrorRecord>,
    actions: Vec<UserActionRecord>,
    analytics: HashMap<Uuid, AnalyticsRecord>,
}

impl MemoryState {
    fn entry_mut(&mut self, entry_id: Uuid) -> TaskerResult<&mut QueueEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.entry_id == entry_id)
            .ok_or(TaskerError::QueueEntryNotFound(entry_id))
    }

    fn entry_index(&self, entry_id: Uuid) -> TaskerResult<usize> {
        self.entries
            .iter()
            .position(|entry| entry.entry_id == entry_id)
            .ok_or(TaskerError::QueueEntryNotFound(entry_id))
    }

    /// Drop the claim on an entry and make it pending again. A task keeps at
    /// most one pending entry, so the entry is folded (completed) when another
    /// pending entry for its task already exists.
    fn return_to_pending(&mut self, index: usize) -> &mut QueueEntry {
        let (entry_id, task_id) = (self.entries[index].entry_id, self.entries[index].task_id);
        let folded = task_id.is_some()
            && self.entries.iter().any(|other| {
                other.entry_id != entry_id
                    && other.task_id == task_id
                    && other.status == QueueEntryStatus::Pending
            });

        let entry = &mut self.entries[index];
        entry.status = if folded {
            QueueEntryStatus::Completed
        } else {
            QueueEntryStatus::Pending
        };
        entry.claimed_by = None;
        entry.claimed_at = None;
        entry
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every queue entry, oldest first
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.state.lock().entries.clone()
    }

    /// Pending entries of one task
    pub fn pending_entries_for_task(&self, task_id: Uuid) -> Vec<QueueEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|entry| {
                entry.task_id == Some(task_id) && entry.status == QueueEntryStatus::Pending
            })
            .cloned()
            .collect()
    }

    /// Overwrite a task row unconditionally (test fixtures, crash simulation)
    pub fn put_task(&self, task: Task) {
        self.state.lock().tasks.insert(task.task_id, task);
    }

    /// Overwrite a job row unconditionally (test fixtures, crash simulation)
    pub fn put_job(&self, job: Job) {
        self.state.lock().jobs.insert(job.job_id, job);
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create_job(&self, job: &Job, tasks: &[Task]) -> TaskerResult<()> {
        let mut state = self.state.lock();
        if state.jobs.contains_key(&job.job_id) {
            return Err(TaskerError::ValidationError(format!(
                "job {} already exists",
                job.job_id
            )));
        }
        state.jobs.insert(job.job_id, job.clone());
        for task in tasks {
            state.tasks.insert(task.task_id, task.clone());
        }
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> TaskerResult<Job> {
        self.state
            .lock()
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(TaskerError::JobNotFound(job_id))
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> TaskerResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .state
            .lock()
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn update_job(&self, job: &Job, expected: JobStatus) -> TaskerResult<bool> {
        let mut state = self.state.lock();
        let stored = state
            .jobs
            .get_mut(&job.job_id)
            .ok_or(TaskerError::JobNotFound(job.job_id))?;
        if stored.status != expected {
            debug!(
                job_id = %job.job_id,
                expected = %expected,
                actual = %stored.status,
                "Job update lost compare-and-set"
            );
            return Ok(false);
        }
        *stored = job.clone();
        Ok(true)
    }

    async fn update_job_progress(
        &self,
        job_id: Uuid,
        counts: &TaskCounts,
        now: DateTime<Utc>,
    ) -> TaskerResult<Job> {
        let mut state = self.state.lock();
        let stored = state
            .jobs
            .get_mut(&job_id)
            .ok_or(TaskerError::JobNotFound(job_id))?;
        let before = (
            stored.total_tasks,
            stored.completed_tasks,
            stored.failed_tasks,
            stored.skipped_tasks,
        );
        stored.apply_counts(counts);
        if before != (counts.total, counts.completed, counts.failed, counts.skipped) {
            stored.updated_at = now;
        }
        Ok(stored.clone())
    }

    async fn get_task(&self, task_id: Uuid) -> TaskerResult<Task> {
        self.state
            .lock()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(TaskerError::TaskNotFound(task_id))
    }

    async fn list_tasks(&self, job_id: Uuid) -> TaskerResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .state
            .lock()
            .tasks
            .values()
            .filter(|task| task.job_id == job_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.sequence);
        Ok(tasks)
    }

    async fn update_task(&self, task: &Task, expected: TaskStatus) -> TaskerResult<bool> {
        let mut state = self.state.lock();
        let stored = state
            .tasks
            .get_mut(&task.task_id)
            .ok_or(TaskerError::TaskNotFound(task.task_id))?;
        if stored.status != expected {
            debug!(
                task_id = %task.task_id,
                expected = %expected,
                actual = %stored.status,
                "Task update lost compare-and-set"
            );
            return Ok(false);
        }
        *stored = task.clone();
        Ok(true)
    }

    async fn record_error(&self, record: &ErrorRecord) -> TaskerResult<()> {
        self.state.lock().errors.push(record.clone());
        Ok(())
    }

    async fn list_errors(&self, job_id: Uuid) -> TaskerResult<Vec<ErrorRecord>> {
        Ok(self
            .state
            .lock()
            .errors
            .iter()
            .filter(|record| record.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn record_action(&self, record: &UserActionRecord) -> TaskerResult<()> {
        self.state.lock().actions.push(record.clone());
        Ok(())
    }

    async fn list_actions(&self, job_id: Uuid) -> TaskerResult<Vec<UserActionRecord>> {
        Ok(self
            .state
            .lock()
            .actions
            .iter()
            .filter(|record| record.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn save_analytics(&self, record: &AnalyticsRecord) -> TaskerResult<()> {
        self.state
            .lock()
            .analytics
            .insert(record.job_id, record.clone());
        Ok(())
    }

    async fn get_analytics(&self, job_id: Uuid) -> TaskerResult<Option<AnalyticsRecord>> {
        Ok(self.state.lock().analytics.get(&job_id).cloned())
    }
}

#[async_trait]
impl WorkQueue for InMemoryStore {
    async fn enqueue(&self, new_entry: NewQueueEntry) -> TaskerResult<QueueEntry> {
        let mut state = self.state.lock();
        if let Some(task_id) = new_entry.task_id {
            if let Some(existing) = state.entries.iter().find(|entry| {
                entry.task_id == Some(task_id) && entry.status == QueueEntryStatus::Pending
            }) {
                return Ok(existing.clone());
            }
        }
        let entry = QueueEntry::from_new(new_entry, Utc::now());
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_entry(&self, entry_id: Uuid) -> TaskerResult<QueueEntry> {
        let mut state = self.state.lock();
        state.entry_mut(entry_id).map(|entry| entry.clone())
    }

    async fn claim_at(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> TaskerResult<Option<QueueEntry>> {
        let mut state = self.state.lock();
        // Highest priority, then earliest scheduled, then insertion order
        let best = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_claimable(now))
            .min_by(|(ai, a), (bi, b)| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.scheduled_for.cmp(&b.scheduled_for))
                    .then_with(|| ai.cmp(bi))
            })
            .map(|(index, _)| index);

        Ok(best.map(|index| {
            let entry = &mut state.entries[index];
            entry.status = QueueEntryStatus::Processing;
            entry.claimed_by = Some(worker_id.to_string());
            entry.claimed_at = Some(now);
            entry.clone()
        }))
    }

    async fn release(&self, entry_id: Uuid) -> TaskerResult<()> {
        let mut state = self.state.lock();
        let index = state.entry_index(entry_id)?;
        if state.entries[index].status == QueueEntryStatus::Processing {
            state.return_to_pending(index).retry_count += 1;
        }
        Ok(())
    }

    async fn defer(&self, entry_id: Uuid, scheduled_for: DateTime<Utc>) -> TaskerResult<()> {
        let mut state = self.state.lock();
        let index = state.entry_index(entry_id)?;
        if state.entries[index].status == QueueEntryStatus::Processing {
            state.return_to_pending(index).scheduled_for = scheduled_for;
        }
        Ok(())
    }

    async fn complete(&self, entry_id: Uuid) -> TaskerResult<()> {
        let mut state = self.state.lock();
        state.entry_mut(entry_id)?.status = QueueEntryStatus::Completed;
        Ok(())
    }

    async fn reclaim_stale_at(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> TaskerResult<Vec<QueueEntry>> {
        let lease = lease_to_chrono(lease);
        let mut state = self.state.lock();
        let stale: Vec<usize> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_stale(lease, now))
            .map(|(index, _)| index)
            .collect();
        let reclaimed = stale
            .into_iter()
            .map(|index| {
                let entry = state.return_to_pending(index);
                entry.retry_count += 1;
                entry.clone()
            })
            .collect();
        Ok(reclaimed)
    }

    async fn cancel_for_job(&self, job_id: Uuid) -> TaskerResult<u64> {
        let mut state = self.state.lock();
        let mut dropped = 0;
        for entry in state
            .entries
            .iter_mut()
            .filter(|entry| entry.job_id == job_id && entry.status == QueueEntryStatus::Pending)
        {
            entry.status = QueueEntryStatus::Completed;
            dropped += 1;
        }
        Ok(dropped)
    }

    async fn depth(&self) -> TaskerResult<i64> {
        Ok(self
            .state
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.status == QueueEntryStatus::Pending)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn entry(priority: i32, scheduled_for: DateTime<Utc>) -> NewQueueEntry {
        NewQueueEntry {
            job_id: Uuid::new_v4(),
            task_id: Some(Uuid::new_v4()),
            priority,
            scheduled_for,
        }
    }

    #[tokio::test]
    async fn test_claim_order_priority_then_schedule() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let low = store.enqueue(entry(1, now - ChronoDuration::seconds(30))).await.unwrap();
        let high_late = store.enqueue(entry(5, now - ChronoDuration::seconds(5))).await.unwrap();
        let high_early = store.enqueue(entry(5, now - ChronoDuration::seconds(10))).await.unwrap();
        store.enqueue(entry(9, now + ChronoDuration::seconds(60))).await.unwrap();

        let order: Vec<Uuid> = [
            store.claim_at("w", now).await.unwrap(),
            store.claim_at("w", now).await.unwrap(),
            store.claim_at("w", now).await.unwrap(),
        ]
        .into_iter()
        .map(|claimed| claimed.unwrap().entry_id)
        .collect();

        assert_eq!(order, vec![high_early.entry_id, high_late.entry_id, low.entry_id]);
        // Future-scheduled entry is not yet eligible
        assert!(store.claim_at("w", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_dedupes_pending_entries_per_task() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let new_entry = entry(1, now);

        let first = store.enqueue(new_entry.clone()).await.unwrap();
        let second = store.enqueue(new_entry.clone()).await.unwrap();
        assert_eq!(first.entry_id, second.entry_id);

        // Once claimed, a fresh entry for the same task may be queued
        store.claim_at("w", now).await.unwrap();
        let third = store.enqueue(new_entry).await.unwrap();
        assert_ne!(first.entry_id, third.entry_id);
    }

    #[tokio::test]
    async fn test_release_and_reclaim_stale() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let queued = store.enqueue(entry(1, now)).await.unwrap();

        let claimed = store.claim_at("w1", now).await.unwrap().unwrap();
        assert_eq!(claimed.claimed_by.as_deref(), Some("w1"));

        let early = now + ChronoDuration::seconds(30);
        assert!(store
            .reclaim_stale_at(Duration::from_secs(60), early)
            .await
            .unwrap()
            .is_empty());

        let late = now + ChronoDuration::seconds(61);
        let reclaimed = store
            .reclaim_stale_at(Duration::from_secs(60), late)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);

        let entry = store.get_entry(queued.entry_id).await.unwrap();
        assert_eq!(entry.status, QueueEntryStatus::Pending);
        assert_eq!(entry.retry_count, 1);
        assert!(entry.claimed_by.is_none());

        store.claim_at("w2", late).await.unwrap().unwrap();
        store.release(queued.entry_id).await.unwrap();
        assert_eq!(store.get_entry(queued.entry_id).await.unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn test_reclaim_with_unbounded_lease_reclaims_nothing() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let queued = store.enqueue(entry(1, now)).await.unwrap();
        store.claim_at("w", now).await.unwrap();

        let much_later = now + ChronoDuration::days(3_650);
        assert!(store
            .reclaim_stale_at(Duration::MAX, much_later)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.get_entry(queued.entry_id).await.unwrap().status,
            QueueEntryStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_defer_does_not_count_attempt() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let queued = store.enqueue(entry(1, now)).await.unwrap();
        store.claim_at("w", now).await.unwrap();

        let later = now + ChronoDuration::seconds(10);
        store.defer(queued.entry_id, later).await.unwrap();

        let entry = store.get_entry(queued.entry_id).await.unwrap();
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.scheduled_for, later);
        assert!(store.claim_at("w", now).await.unwrap().is_none());
        assert!(store.claim_at("w", later).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_folds_into_pending_sibling() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let first = store.enqueue(entry(1, now)).await.unwrap();
        store.claim_at("w", now).await.unwrap();

        // The task is queued again while its first entry is still being worked
        let task_id = first.task_id.unwrap();
        let second = store
            .enqueue(NewQueueEntry::for_task(first.job_id, task_id, 1, now))
            .await
            .unwrap();
        assert_ne!(second.entry_id, first.entry_id);

        store.release(first.entry_id).await.unwrap();
        assert_eq!(
            store.get_entry(first.entry_id).await.unwrap().status,
            QueueEntryStatus::Completed
        );
        assert_eq!(store.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_for_job_drops_pending_only() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let job_id = Uuid::new_v4();
        for _ in 0..3 {
            store
                .enqueue(NewQueueEntry {
                    job_id,
                    task_id: Some(Uuid::new_v4()),
                    priority: 0,
                    scheduled_for: now,
                })
                .await
                .unwrap();
        }
        store.claim_at("w", now).await.unwrap();

        assert_eq!(store.cancel_for_job(job_id).await.unwrap(), 2);
        assert_eq!(store.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_unique() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        for i in 0..50 {
            store.enqueue(entry(i % 3, now)).await.unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(entry) = store.claim_at(&format!("w{worker}"), now).await.unwrap() {
                    claimed.push(entry.entry_id);
                    tokio::task::yield_now().await;
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for entry_id in handle.await.unwrap() {
                assert!(seen.insert(entry_id), "entry claimed twice");
            }
        }
        assert_eq!(seen.len(), 50);
    }
}
