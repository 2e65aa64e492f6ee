//! PostgreSQL backend checks. Each test gets a fresh database from `sqlx::test`
//! with the crate migrations applied; run with `DATABASE_URL` set and `--ignored`.

#![cfg(feature = "postgres")]

use chrono::{Duration, Utc};
use coursegen_core::database::{JobStore, PgStore, WorkQueue};
use coursegen_core::models::{Job, NewJob, NewQueueEntry, Task, TaskCounts, TaskSpec, TaskType};
use coursegen_core::state_machine::QueueEntryStatus;
use coursegen_core::{JobStatus, TaskStatus};
use sqlx::PgPool;

async fn seed(store: &PgStore, task_count: usize) -> (Job, Vec<Task>) {
    let now = Utc::now();
    let new_job = NewJob {
        owner_id: "owner-1".to_string(),
        tenant_id: "tenant-1".to_string(),
        request_payload: serde_json::json!({"topic": "databases"}),
        tasks: (1..=task_count)
            .map(|n| TaskSpec::new(format!("lesson_{n}"), TaskType::LessonSection))
            .collect(),
    };
    let job = Job::new(&new_job, now);
    let tasks: Vec<Task> = new_job
        .tasks
        .iter()
        .enumerate()
        .map(|(n, spec)| Task::from_spec(job.job_id, spec, n as i32, 3, now))
        .collect();
    store.create_job(&job, &tasks).await.unwrap();
    (job, tasks)
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_job_and_tasks_round_trip(pool: PgPool) {
    let store = PgStore::new(pool);
    let (job, tasks) = seed(&store, 3).await;

    let loaded = store.get_job(job.job_id).await.unwrap();
    assert_eq!(loaded.status, JobStatus::Queued);
    assert_eq!(loaded.total_tasks, 3);
    assert_eq!(loaded.request_payload, job.request_payload);

    let listed = store.list_tasks(job.job_id).await.unwrap();
    let identifiers: Vec<&str> = listed.iter().map(|t| t.task_identifier.as_str()).collect();
    assert_eq!(identifiers, vec!["lesson_1", "lesson_2", "lesson_3"]);
    assert_eq!(listed[0].task_id, tasks[0].task_id);
    assert_eq!(
        store.list_jobs_by_status(JobStatus::Queued).await.unwrap().len(),
        1
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_status_updates_are_compare_and_set(pool: PgPool) {
    let store = PgStore::new(pool);
    let (job, tasks) = seed(&store, 1).await;

    let mut task = tasks[0].clone();
    task.status = TaskStatus::Running;
    task.started_at = Some(Utc::now());
    assert!(store.update_task(&task, TaskStatus::Pending).await.unwrap());
    // The stored row is no longer pending, so a second writer loses
    assert!(!store.update_task(&task, TaskStatus::Pending).await.unwrap());

    let mut job = job;
    job.status = JobStatus::Processing;
    assert!(store.update_job(&job, JobStatus::Queued).await.unwrap());
    assert!(!store.update_job(&job, JobStatus::Queued).await.unwrap());
    assert_eq!(
        store.get_job(job.job_id).await.unwrap().status,
        JobStatus::Processing
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_progress_touches_updated_at_only_on_change(pool: PgPool) {
    let store = PgStore::new(pool);
    let (job, _) = seed(&store, 4).await;
    let later = Utc::now() + Duration::minutes(5);

    let counts = TaskCounts {
        total: 4,
        ..TaskCounts::default()
    };
    let unchanged = store
        .update_job_progress(job.job_id, &counts, later)
        .await
        .unwrap();
    assert!(unchanged.updated_at < later - Duration::minutes(1));

    let counts = TaskCounts {
        total: 4,
        completed: 1,
        ..TaskCounts::default()
    };
    let changed = store
        .update_job_progress(job.job_id, &counts, later)
        .await
        .unwrap();
    assert_eq!(changed.completed_tasks, 1);
    assert_eq!(changed.progress_percentage, 25.0);
    assert!(changed.updated_at > later - Duration::seconds(1));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_claim_order_and_dedupe(pool: PgPool) {
    let store = PgStore::new(pool);
    let (job, tasks) = seed(&store, 3).await;
    let now = Utc::now();

    let low = store
        .enqueue(NewQueueEntry::for_task(job.job_id, tasks[0].task_id, 10, now))
        .await
        .unwrap();
    let high = store
        .enqueue(NewQueueEntry::for_task(job.job_id, tasks[1].task_id, 50, now))
        .await
        .unwrap();
    let future = store
        .enqueue(
            NewQueueEntry::for_task(job.job_id, tasks[2].task_id, 90, now)
                .scheduled_at(now + Duration::hours(1)),
        )
        .await
        .unwrap();

    // A second entry for a task with a pending one is folded into it
    let again = store
        .enqueue(NewQueueEntry::for_task(job.job_id, tasks[0].task_id, 10, now))
        .await
        .unwrap();
    assert_eq!(again.entry_id, low.entry_id);
    assert_eq!(store.depth().await.unwrap(), 3);

    let first = store.claim_at("w1", now).await.unwrap().unwrap();
    assert_eq!(first.entry_id, high.entry_id);
    assert_eq!(first.claimed_by.as_deref(), Some("w1"));
    let second = store.claim_at("w2", now).await.unwrap().unwrap();
    assert_eq!(second.entry_id, low.entry_id);
    // Not due yet
    assert!(store.claim_at("w3", now).await.unwrap().is_none());

    let due = store
        .claim_at("w3", now + Duration::hours(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(due.entry_id, future.entry_id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_release_reclaim_and_cancel(pool: PgPool) {
    let store = PgStore::new(pool);
    let (job, tasks) = seed(&store, 2).await;
    let now = Utc::now();

    for task in &tasks {
        store
            .enqueue(NewQueueEntry::for_task(job.job_id, task.task_id, 10, now))
            .await
            .unwrap();
    }

    let claimed = store.claim_at("w1", now).await.unwrap().unwrap();
    store.release(claimed.entry_id).await.unwrap();
    let released = store.get_entry(claimed.entry_id).await.unwrap();
    assert_eq!(released.retry_count, 1);
    assert!(released.claimed_by.is_none());

    let stale = store.claim_at("w1", now).await.unwrap().unwrap();
    let lease = std::time::Duration::from_secs(300);
    assert!(store.reclaim_stale_at(lease, now).await.unwrap().is_empty());
    let reclaimed = store
        .reclaim_stale_at(lease, now + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].entry_id, stale.entry_id);

    assert_eq!(store.cancel_for_job(job.job_id).await.unwrap(), 2);
    assert_eq!(store.depth().await.unwrap(), 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_concurrent_enqueue_keeps_one_pending_entry(pool: PgPool) {
    let store = PgStore::new(pool);
    let (job, tasks) = seed(&store, 1).await;
    let now = Utc::now();
    let task_id = tasks[0].task_id;

    let enqueues = (0..8).map(|_| {
        store.enqueue(NewQueueEntry::for_task(job.job_id, task_id, 10, now))
    });
    let entries: Vec<_> = futures::future::join_all(enqueues)
        .await
        .into_iter()
        .map(|entry| entry.unwrap())
        .collect();

    assert!(entries.iter().all(|e| e.entry_id == entries[0].entry_id));
    assert_eq!(store.depth().await.unwrap(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_return_to_pending_folds_into_sibling(pool: PgPool) {
    let store = PgStore::new(pool);
    let (job, tasks) = seed(&store, 1).await;
    let now = Utc::now();
    let task_id = tasks[0].task_id;

    let first = store
        .enqueue(NewQueueEntry::for_task(job.job_id, task_id, 10, now))
        .await
        .unwrap();
    store.claim_at("w1", now).await.unwrap().unwrap();
    let second = store
        .enqueue(NewQueueEntry::for_task(job.job_id, task_id, 10, now))
        .await
        .unwrap();
    assert_ne!(second.entry_id, first.entry_id);

    store
        .defer(first.entry_id, now + Duration::minutes(5))
        .await
        .unwrap();
    let folded = store.get_entry(first.entry_id).await.unwrap();
    assert_eq!(folded.status, QueueEntryStatus::Completed);
    assert_eq!(store.depth().await.unwrap(), 1);

    // An unbounded lease never makes a claim stale
    store.claim_at("w2", now).await.unwrap().unwrap();
    assert!(store
        .reclaim_stale_at(std::time::Duration::MAX, now + Duration::days(3_650))
        .await
        .unwrap()
        .is_empty());
}
