//! End-to-end job lifecycle against the in-memory store

mod common;

use common::{fan_out_job, Harness, ScriptedHandler};
use coursegen_core::database::{JobStore, WorkQueue};
use coursegen_core::models::{NewJob, TaskSpec, TaskType};
use coursegen_core::orchestration::ExecutionOutcome;
use coursegen_core::{JobStatus, TaskStatus, TaskerError};
use parking_lot::Mutex;
use std::sync::Arc;

#[tokio::test]
async fn test_course_request_runs_to_completion() {
    let harness = Harness::new();
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut assessment = None;
    for task_type in TaskType::ALL {
        let handler = harness
            .register(ScriptedHandler::succeeding(task_type).with_journal(journal.clone()));
        if task_type == TaskType::AssessmentGeneration {
            assessment = Some(handler);
        }
    }

    let job_id = harness
        .core
        .submit_course_request("owner-1", "tenant-1", serde_json::json!({"lesson_count": 2}))
        .await
        .unwrap();
    assert_eq!(
        harness.core.job_status(job_id).await.unwrap().job.status,
        JobStatus::Queued
    );

    harness.drain().await;

    let status = harness.core.job_status(job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Completed);
    assert_eq!(status.progress_percentage(), 100.0);
    assert!(status.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(status.job.started_at.is_some());
    assert!(status.job.completed_at.is_some());

    let result = status.job.result_payload.unwrap();
    assert_eq!(result["tasks"].as_object().unwrap().len(), 6);

    // Dependencies always ran first
    let order = journal.lock().clone();
    let position = |id: &str| order.iter().position(|entry| entry == id).unwrap();
    assert!(position("knowledge_analysis") < position("outline_generation"));
    for lesson in ["lesson_section_1", "lesson_section_2"] {
        assert!(position("outline_generation") < position(lesson));
        assert!(position(lesson) < position("assessment_generation"));
    }
    assert!(position("assessment_generation") < position("validation"));

    let assessment_context = &assessment.unwrap().contexts()[0];
    assert_eq!(assessment_context.dependency_outputs.len(), 2);
    assert_eq!(assessment_context.attempt, 1);

    let analytics = harness.core.job_analytics(job_id).await.unwrap();
    assert_eq!(analytics.total_tasks, 6);
    assert_eq!(analytics.success_rate, 100.0);
    assert_eq!(analytics.usage.external_calls, 6);
    assert_eq!(harness.store.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_submit_enqueues_only_root_tasks() {
    let harness = Harness::new();
    let job_id = harness.core.submit_job(fan_out_job()).await.unwrap();

    let status = harness.core.job_status(job_id).await.unwrap();
    let by_id = |id: &str| {
        status
            .tasks
            .iter()
            .find(|t| t.task_identifier == id)
            .unwrap()
            .status
    };
    assert_eq!(by_id("A"), TaskStatus::Queued);
    assert_eq!(by_id("B"), TaskStatus::Pending);
    assert_eq!(by_id("C"), TaskStatus::Pending);
    assert_eq!(harness.store.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_submit_rejects_invalid_graphs() {
    let harness = Harness::new();
    let job = |tasks: Vec<TaskSpec>| NewJob {
        owner_id: "owner-1".into(),
        tenant_id: "tenant-1".into(),
        request_payload: serde_json::json!({}),
        tasks,
    };

    let cycle = job(vec![
        TaskSpec::new("a", TaskType::LessonSection).depends_on(["b"]),
        TaskSpec::new("b", TaskType::LessonSection).depends_on(["a"]),
    ]);
    let duplicate = job(vec![
        TaskSpec::new("a", TaskType::LessonSection),
        TaskSpec::new("a", TaskType::Validation),
    ]);
    let self_loop = job(vec![TaskSpec::new("a", TaskType::LessonSection).depends_on(["a"])]);

    for invalid in [cycle, duplicate, self_loop, job(vec![])] {
        assert!(matches!(
            harness.core.submit_job(invalid).await,
            Err(TaskerError::ValidationError(_))
        ));
    }
    assert_eq!(harness.store.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unresolved_dependency_keeps_task_blocked() {
    let harness = Harness::new();
    harness.register_defaults();
    let job_id = harness
        .core
        .submit_job(NewJob {
            owner_id: "owner-1".into(),
            tenant_id: "tenant-1".into(),
            request_payload: serde_json::json!({}),
            tasks: vec![
                TaskSpec::new("intro", TaskType::LessonSection),
                TaskSpec::new("wrap_up", TaskType::LessonSection).depends_on(["not_declared"]),
            ],
        })
        .await
        .unwrap();

    harness.drain().await;

    let status = harness.core.job_status(job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Processing);
    assert_eq!(status.tasks[0].status, TaskStatus::Completed);
    assert_eq!(status.tasks[1].status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_entry_for_unready_task_is_not_executed() {
    let harness = Harness::new();
    let handler = harness.register(ScriptedHandler::succeeding(TaskType::OutlineGeneration));
    harness.register_defaults();
    let job_id = harness.core.submit_job(fan_out_job()).await.unwrap();

    // Force an entry for B while A is still queued
    let tasks = harness.store.list_tasks(job_id).await.unwrap();
    let b = tasks.iter().find(|t| t.task_identifier == "B").unwrap();
    let entry = harness
        .store
        .enqueue(coursegen_core::models::NewQueueEntry::for_task(
            job_id,
            b.task_id,
            100,
            chrono::Utc::now(),
        ))
        .await
        .unwrap();
    let claimed = harness.store.claim("worker").await.unwrap().unwrap();
    assert_eq!(claimed.entry_id, entry.entry_id);

    let outcome = harness.core.executor().execute(&claimed).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::NotReady { task_id: b.task_id });
    assert_eq!(handler.calls(), 0);
}
