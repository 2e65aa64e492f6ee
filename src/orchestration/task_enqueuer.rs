//! # Task Enqueuer
//!
//! Turns graph readiness into queue entries. Whenever a task reaches a state
//! that may unblock others (completion, skip, operator retry, resume), the
//! caller asks the enqueuer to queue whatever became ready. Entries are the
//! only path by which work reaches a worker.

use crate::database::{JobStore, WorkQueue};
use crate::error::TaskerResult;
use crate::models::{NewQueueEntry, Task};
use crate::orchestration::task_graph::TaskGraph;
use crate::state_machine::TaskStatus;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct TaskEnqueuer {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
}

impl std::fmt::Debug for TaskEnqueuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEnqueuer").finish_non_exhaustive()
    }
}

impl TaskEnqueuer {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { store, queue }
    }

    /// Queue every ready `pending`/`queued` task of a job
    #[instrument(skip(self))]
    pub async fn enqueue_ready(&self, job_id: Uuid, now: DateTime<Utc>) -> TaskerResult<Vec<Uuid>> {
        let tasks = self.store.list_tasks(job_id).await?;
        let graph = TaskGraph::new(&tasks);
        let ready: Vec<Task> = graph.next_ready_tasks().into_iter().cloned().collect();
        self.enqueue_tasks(ready, now).await
    }

    /// Queue the tasks unblocked by `task_identifier` reaching `completed` or `skipped`
    #[instrument(skip(self))]
    pub async fn enqueue_dependents(
        &self,
        job_id: Uuid,
        task_identifier: &str,
        now: DateTime<Utc>,
    ) -> TaskerResult<Vec<Uuid>> {
        let tasks = self.store.list_tasks(job_id).await?;
        let graph = TaskGraph::new(&tasks);
        let ready: Vec<Task> = graph
            .ready_dependents_of(task_identifier)
            .into_iter()
            .cloned()
            .collect();
        self.enqueue_tasks(ready, now).await
    }

    /// Queue ready tasks including `retrying` ones whose deferred entry was dropped
    pub async fn requeue_job(&self, job_id: Uuid, now: DateTime<Utc>) -> TaskerResult<Vec<Uuid>> {
        let tasks = self.store.list_tasks(job_id).await?;
        let graph = TaskGraph::new(&tasks);
        let mut ready: Vec<Task> = graph.next_ready_tasks().into_iter().cloned().collect();
        ready.extend(
            tasks
                .iter()
                .filter(|task| task.status == TaskStatus::Retrying && graph.is_ready(task))
                .cloned(),
        );
        self.enqueue_tasks(ready, now).await
    }

    async fn enqueue_tasks(&self, tasks: Vec<Task>, now: DateTime<Utc>) -> TaskerResult<Vec<Uuid>> {
        let mut enqueued = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            self.queue
                .enqueue(NewQueueEntry::for_task(
                    task.job_id,
                    task.task_id,
                    task.priority,
                    now,
                ))
                .await?;

            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Queued;
                task.queued_at = Some(now);
                // Losing the race just means someone else already moved it on
                self.store.update_task(&task, TaskStatus::Pending).await?;
            }

            debug!(
                task_id = %task.task_id,
                task_identifier = %task.task_identifier,
                priority = task.priority,
                "Enqueued ready task"
            );
            enqueued.push(task.task_id);
        }
        Ok(enqueued)
    }
}
