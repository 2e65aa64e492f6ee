//! Retry budget, severity handling and circuit breaking in the executor

mod common;

use common::{
    default_output, fan_out_job, independent_job, test_config, timeout_error, Harness,
    ScriptedHandler, TEST_WORKER,
};
use coursegen_core::config::BreakerThresholds;
use coursegen_core::database::JobStore;
use coursegen_core::models::{NewJob, ResolutionOutcome, TaskSpec, TaskType};
use coursegen_core::orchestration::{ErrorCategory, ErrorSeverity, HandlerError};
use coursegen_core::resilience::CircuitState;
use coursegen_core::{JobStatus, TaskStatus};
use std::time::Duration;

fn single_task_job(max_retries: i32) -> NewJob {
    NewJob {
        owner_id: "owner-1".into(),
        tenant_id: "tenant-1".into(),
        request_payload: serde_json::json!({}),
        tasks: vec![TaskSpec::new("outline", TaskType::OutlineGeneration).with_max_retries(max_retries)],
    }
}

#[tokio::test]
async fn test_recoverable_failure_exhausts_budget() {
    let harness = Harness::new();
    let handler = harness.register(ScriptedHandler::failing(
        TaskType::OutlineGeneration,
        timeout_error(),
    ));
    let job_id = harness.core.submit_job(single_task_job(2)).await.unwrap();

    harness.drain().await;

    // max_retries + 1 attempts, never more
    assert_eq!(handler.calls(), 3);
    let attempts: Vec<i32> = handler.contexts().iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let task = &harness.store.list_tasks(job_id).await.unwrap()[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert!(task.completed_at.is_some());
    assert_eq!(task.error_category, Some(ErrorCategory::ExternalDependency));

    let errors = harness.core.job_errors(job_id).await.unwrap();
    let resolutions: Vec<ResolutionOutcome> = errors.iter().map(|e| e.resolution).collect();
    assert_eq!(
        resolutions,
        vec![
            ResolutionOutcome::Retrying,
            ResolutionOutcome::Retrying,
            ResolutionOutcome::Failed
        ]
    );
    assert!(errors.iter().all(|e| e.error_type == "EXTERNAL_TIMEOUT"));
    assert!(!errors[0].suggestions.is_empty());

    // Failure promotion belongs to the health sweep
    assert_eq!(
        harness.core.job_status(job_id).await.unwrap().job.status,
        JobStatus::Processing
    );
    let report = harness.core.sweep().await.unwrap();
    assert_eq!(report.failed_jobs, vec![job_id]);
    let job = harness.core.job_status(job_id).await.unwrap().job;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_summary.unwrap().starts_with("1 of 1 tasks failed"));
}

#[tokio::test]
async fn test_flaky_task_recovers_within_budget() {
    let harness = Harness::new();
    let handler = harness.register(
        ScriptedHandler::succeeding(TaskType::OutlineGeneration).then([
            Err(timeout_error()),
            Err(HandlerError::RateLimited {
                message: "slow down".into(),
                retry_after: None,
            }),
        ]),
    );
    let job_id = harness.core.submit_job(single_task_job(3)).await.unwrap();

    harness.drain().await;

    assert_eq!(handler.calls(), 3);
    let task = &harness.store.list_tasks(job_id).await.unwrap()[0];
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 2);
    assert!(task.error_message.is_none());
    assert_eq!(task.output_payload, Some(default_output(TaskType::OutlineGeneration).payload));
    assert_eq!(
        harness.core.job_status(job_id).await.unwrap().job.status,
        JobStatus::Completed
    );
    assert_eq!(harness.core.job_errors(job_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_critical_failure_gets_single_attempt() {
    let harness = Harness::new();
    let handler = harness.register(ScriptedHandler::failing(
        TaskType::OutlineGeneration,
        HandlerError::Internal("template engine crashed".into()),
    ));
    let job_id = harness.core.submit_job(single_task_job(5)).await.unwrap();

    harness.drain().await;

    assert_eq!(handler.calls(), 1);
    let task = &harness.store.list_tasks(job_id).await.unwrap()[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 0);
    assert_eq!(task.error_severity, Some(ErrorSeverity::Critical));
    assert_eq!(task.error_recoverable, Some(false));
}

#[tokio::test]
async fn test_missing_handler_fails_task_as_system_error() {
    let harness = Harness::new();
    let job_id = harness.core.submit_job(single_task_job(3)).await.unwrap();

    harness.drain().await;

    let task = &harness.store.list_tasks(job_id).await.unwrap()[0];
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_category, Some(ErrorCategory::System));
    assert_eq!(task.error_severity, Some(ErrorSeverity::Critical));
    let errors = harness.core.job_errors(job_id).await.unwrap();
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn test_non_recoverable_failure_blocks_dependents() {
    let harness = Harness::new();
    harness.register(ScriptedHandler::failing(
        TaskType::KnowledgeAnalysis,
        HandlerError::InvalidInput {
            field: "topic".into(),
            reason: "empty".into(),
        },
    ));
    let outline = harness.register(ScriptedHandler::succeeding(TaskType::OutlineGeneration));
    harness.register_defaults();
    let job_id = harness.core.submit_job(fan_out_job()).await.unwrap();

    harness.drain().await;

    let status = harness.core.job_status(job_id).await.unwrap();
    assert_eq!(status.tasks[0].status, TaskStatus::Failed);
    assert_eq!(status.tasks[1].status, TaskStatus::Pending);
    assert_eq!(status.tasks[2].status, TaskStatus::Pending);
    assert_eq!(outline.calls(), 0);

    // Not every task is terminal, so the sweep leaves the job alone
    let report = harness.core.sweep().await.unwrap();
    assert!(report.failed_jobs.is_empty());
}

#[tokio::test]
async fn test_open_breaker_defers_without_spending_retries() {
    let mut config = test_config();
    config.circuit_breakers.components.insert(
        "flaky_provider".to_string(),
        BreakerThresholds {
            failure_threshold: 1,
            timeout_seconds: 2,
        },
    );
    let harness = Harness::with_config(config);
    let handler = harness.register(
        ScriptedHandler::succeeding(TaskType::LessonSection)
            .with_dependency("flaky_provider")
            .then([Err(HandlerError::Upstream("503 from provider".into()))]),
    );

    let mut job = independent_job(3);
    job.tasks = job.tasks.into_iter().map(|spec| spec.with_max_retries(3)).collect();
    let job_id = harness.core.submit_job(job).await.unwrap();

    let pool = harness.core.worker_pool();
    pool.run_until_idle(TEST_WORKER).await.unwrap();

    // One real call trips the breaker; the other tasks never reach the provider
    assert_eq!(handler.calls(), 1);
    let breaker = harness
        .core
        .circuit_breaker_manager
        .get_circuit_breaker("flaky_provider");
    assert_eq!(breaker.state(), CircuitState::Open);

    let tasks = harness.store.list_tasks(job_id).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Retrying));
    assert_eq!(tasks.iter().map(|t| t.retry_count).sum::<i32>(), 1);

    let errors = harness.core.job_errors(job_id).await.unwrap();
    let rejected: Vec<_> = errors
        .iter()
        .filter(|e| e.error_type == "CIRCUIT_OPEN")
        .collect();
    assert!(rejected.len() >= 2);
    assert!(rejected
        .iter()
        .all(|e| e.resolution == ResolutionOutcome::Deferred));

    // Deferred entries come back once the cool-down has passed
    tokio::time::sleep(Duration::from_millis(2_200)).await;
    harness.drain().await;

    assert_eq!(handler.calls(), 4);
    assert_eq!(breaker.state(), CircuitState::Closed);
    let tasks = harness.store.list_tasks(job_id).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert_eq!(tasks.iter().map(|t| t.retry_count).sum::<i32>(), 1);
    assert_eq!(
        harness.core.job_status(job_id).await.unwrap().job.status,
        JobStatus::Completed
    );
}
