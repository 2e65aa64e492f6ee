//! Health sweep: lease reclamation, stuck/stalled detection and finalization

mod common;

use chrono::{Duration, Utc};
use common::{independent_job, Harness};
use coursegen_core::constants::alerts;
use coursegen_core::database::{JobStore, WorkQueue};
use coursegen_core::models::Task;
use coursegen_core::orchestration::AlertSeverity;
use coursegen_core::{JobStatus, TaskStatus};
use uuid::Uuid;

/// Put a submitted job into `processing` with tasks forced into `statuses`
async fn seed_processing_job(
    harness: &Harness,
    statuses: &[TaskStatus],
) -> (Uuid, Vec<Task>) {
    let job_id = harness
        .core
        .submit_job(independent_job(statuses.len()))
        .await
        .unwrap();
    let now = Utc::now();

    let mut job = harness.store.get_job(job_id).await.unwrap();
    job.status = JobStatus::Processing;
    job.started_at = Some(now - Duration::minutes(5));
    harness.store.put_job(job);

    let mut tasks = harness.store.list_tasks(job_id).await.unwrap();
    for (task, status) in tasks.iter_mut().zip(statuses) {
        task.status = *status;
        if *status != TaskStatus::Pending {
            task.started_at = Some(now - Duration::seconds(60));
        }
        if status.is_terminal() {
            task.completed_at = Some(now - Duration::seconds(30));
        }
        harness.store.put_task(task.clone());
    }
    (job_id, tasks)
}

#[tokio::test]
async fn test_sweep_completes_fully_completed_job() {
    let harness = Harness::new();
    let (job_id, _) = seed_processing_job(&harness, &[TaskStatus::Completed; 5]).await;

    let report = harness.core.sweep().await.unwrap();
    assert_eq!(report.completed_jobs, vec![job_id]);
    assert!(report.alerts.is_empty());

    let job = harness.store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percentage, 100.0);

    let analytics = harness.store.get_analytics(job_id).await.unwrap().unwrap();
    assert_eq!(analytics.total_tasks, 5);
    assert_eq!(analytics.success_rate, 100.0);
    assert_eq!(analytics.total_task_time_secs, 150.0);

    // A second sweep is a no-op
    let again = harness.core.sweep().await.unwrap();
    assert_eq!(again.jobs_checked, 0);
    assert_eq!(
        harness.store.get_job(job_id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_sweep_fails_job_with_failed_task() {
    let harness = Harness::new();
    let (job_id, tasks) = seed_processing_job(
        &harness,
        &[
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ],
    )
    .await;

    let report = harness.core.sweep().await.unwrap();
    assert_eq!(report.failed_jobs, vec![job_id]);

    let job = harness.store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress_percentage, 80.0);
    let summary = job.error_summary.unwrap();
    assert!(summary.starts_with("1 of 5 tasks failed"), "{summary}");
    assert!(summary.contains(&tasks[4].task_identifier));

    let analytics = harness.store.get_analytics(job_id).await.unwrap().unwrap();
    assert_eq!(analytics.success_rate, 80.0);
}

#[tokio::test]
async fn test_sweep_completes_job_with_skipped_tasks() {
    let harness = Harness::new();
    let (job_id, _) = seed_processing_job(
        &harness,
        &[TaskStatus::Completed, TaskStatus::Skipped, TaskStatus::Completed],
    )
    .await;

    let report = harness.core.sweep().await.unwrap();
    assert_eq!(report.completed_jobs, vec![job_id]);
}

#[tokio::test]
async fn test_sweep_reclaims_expired_leases() {
    let harness = Harness::new();
    let job_id = harness.core.submit_job(independent_job(1)).await.unwrap();

    // A worker claims the entry and crashes; the sweep runs past the lease
    let entry = harness
        .store
        .claim("crashed-worker")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.job_id, job_id);
    assert_eq!(harness.store.depth().await.unwrap(), 0);

    let later = Utc::now() + Duration::minutes(10);
    let report = harness.core.health_monitor().sweep_at(later).await.unwrap();
    assert_eq!(report.reclaimed_entries, 1);

    let reclaimed = harness.store.get_entry(entry.entry_id).await.unwrap();
    assert_eq!(reclaimed.retry_count, 1);
    assert!(reclaimed.claimed_by.is_none());
    assert_eq!(harness.store.depth().await.unwrap(), 1);

    // Claims within the lease are left alone
    harness.store.claim("live-worker").await.unwrap().unwrap();
    let report = harness.core.sweep().await.unwrap();
    assert_eq!(report.reclaimed_entries, 0);
}

#[tokio::test]
async fn test_stuck_job_resets_stalled_tasks() {
    let harness = Harness::new();
    let (job_id, tasks) = seed_processing_job(
        &harness,
        &[TaskStatus::Completed, TaskStatus::Running],
    )
    .await;
    let now = Utc::now();

    // Nothing has happened for an hour
    let mut job = harness.store.get_job(job_id).await.unwrap();
    job.updated_at = now - Duration::hours(1);
    harness.store.put_job(job);
    for task in &tasks {
        let mut task = harness.store.get_task(task.task_id).await.unwrap();
        task.queued_at = None;
        task.started_at = Some(now - Duration::hours(1));
        if task.status.is_terminal() {
            task.completed_at = Some(now - Duration::minutes(59));
        }
        harness.store.put_task(task);
    }

    let report = harness.core.health_monitor().sweep_at(now).await.unwrap();
    assert_eq!(report.alerts.len(), 1);
    let alert = &report.alerts[0];
    assert_eq!(alert.alert_type, alerts::STUCK_JOB);
    assert_eq!(alert.severity, AlertSeverity::Critical);
    assert_eq!(alert.task_ids, vec![tasks[1].task_id]);
    assert_eq!(report.reset_tasks, vec![tasks[1].task_id]);

    let reset = harness.store.get_task(tasks[1].task_id).await.unwrap();
    assert_eq!(reset.status, TaskStatus::Queued);
    assert!(reset.started_at.is_none());
    assert_eq!(harness.store.pending_entries_for_task(reset.task_id).len(), 1);
    assert_eq!(
        harness.store.get_job(job_id).await.unwrap().status,
        JobStatus::Processing
    );
}

#[tokio::test]
async fn test_stalled_task_in_active_job_only_warns() {
    let harness = Harness::new();
    let (job_id, tasks) = seed_processing_job(
        &harness,
        &[TaskStatus::Running, TaskStatus::Completed],
    )
    .await;
    let now = Utc::now();

    let mut stalled = harness.store.get_task(tasks[0].task_id).await.unwrap();
    stalled.started_at = Some(now - Duration::minutes(15));
    harness.store.put_task(stalled);

    let report = harness.core.health_monitor().sweep_at(now).await.unwrap();
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].alert_type, alerts::STALLED_TASKS);
    assert_eq!(report.alerts[0].severity, AlertSeverity::Warning);
    assert!(report.reset_tasks.is_empty());
    assert!(!report.has_critical_alerts());

    assert_eq!(
        harness.store.get_task(tasks[0].task_id).await.unwrap().status,
        TaskStatus::Running
    );
    assert_eq!(
        harness.store.get_job(job_id).await.unwrap().status,
        JobStatus::Processing
    );
}
