//! Worker pool running real tokio workers against a shared in-memory store

mod common;

use common::{independent_job, Harness, ScriptedHandler};
use coursegen_core::database::WorkQueue;
use coursegen_core::models::TaskType;
use coursegen_core::{JobStatus, TaskerError};
use std::time::Duration;
use uuid::Uuid;

async fn wait_for_terminal(harness: &Harness, job_ids: &[Uuid]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let mut all_done = true;
        for job_id in job_ids {
            let status = harness.core.job_status(*job_id).await.unwrap().job.status;
            all_done &= status.is_terminal();
        }
        if all_done {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "jobs did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_runs_course_request_to_completion() {
    let harness = Harness::new();
    harness.register_defaults();
    let pool = harness.core.worker_pool();
    assert_eq!(
        pool.worker_ids(),
        vec!["test-worker-1", "test-worker-2", "test-worker-3"]
    );

    pool.start().unwrap();
    assert!(pool.is_running());
    assert!(matches!(
        pool.start(),
        Err(TaskerError::OrchestrationError(_))
    ));

    let job_id = harness
        .core
        .submit_course_request("owner-1", "tenant-1", serde_json::json!({"lesson_count": 4}))
        .await
        .unwrap();
    wait_for_terminal(&harness, &[job_id]).await;

    pool.stop(Duration::from_secs(5)).await.unwrap();
    assert!(!pool.is_running());
    // Stopping twice is harmless
    pool.stop(Duration::from_secs(1)).await.unwrap();

    let status = harness.core.job_status(job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Completed);
    assert_eq!(status.tasks.len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_execute_each_task_once() {
    let harness = Harness::new();
    let handler = harness.register(ScriptedHandler::succeeding(TaskType::LessonSection));
    let pool = harness.core.worker_pool();

    let mut job_ids = Vec::new();
    for _ in 0..10 {
        job_ids.push(harness.core.submit_job(independent_job(4)).await.unwrap());
    }

    pool.start().unwrap();
    wait_for_terminal(&harness, &job_ids).await;
    pool.stop(Duration::from_secs(5)).await.unwrap();

    assert_eq!(handler.calls(), 40);
    let mut executed: Vec<Uuid> = handler.contexts().iter().map(|c| c.task_id).collect();
    executed.sort();
    executed.dedup();
    assert_eq!(executed.len(), 40);

    for job_id in job_ids {
        assert_eq!(
            harness.core.job_status(job_id).await.unwrap().job.status,
            JobStatus::Completed
        );
    }
    assert_eq!(harness.store.depth().await.unwrap(), 0);
}
