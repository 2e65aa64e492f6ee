//! Shared harness for integration tests: scripted handlers, fast configuration
//! and helpers that drive workers until the queue drains.

#![allow(dead_code)]

use async_trait::async_trait;
use coursegen_core::config::OrchestratorConfig;
use coursegen_core::database::{InMemoryStore, WorkQueue};
use coursegen_core::models::{NewJob, TaskSpec, TaskType, TaskUsage};
use coursegen_core::orchestration::{
    ExecutionOutcome, HandlerError, OrchestrationCore, TaskContext, TaskHandler, TaskOutput,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_WORKER: &str = "test-worker";

/// Handler that replays a script of results, then repeats a fallback
pub struct ScriptedHandler {
    task_type: TaskType,
    dependency: String,
    script: Mutex<VecDeque<Result<TaskOutput, HandlerError>>>,
    fallback: Result<TaskOutput, HandlerError>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<TaskContext>>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl ScriptedHandler {
    pub fn succeeding(task_type: TaskType) -> Self {
        Self::with_fallback(task_type, Ok(default_output(task_type)))
    }

    pub fn failing(task_type: TaskType, error: HandlerError) -> Self {
        Self::with_fallback(task_type, Err(error))
    }

    fn with_fallback(task_type: TaskType, fallback: Result<TaskOutput, HandlerError>) -> Self {
        Self {
            task_type,
            dependency: format!("{}_model", task_type.as_str()),
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
            journal: None,
        }
    }

    /// Results returned, in order, before the fallback applies
    pub fn then(self, results: impl IntoIterator<Item = Result<TaskOutput, HandlerError>>) -> Self {
        self.script.lock().extend(results);
        self
    }

    pub fn with_dependency(mut self, dependency: &str) -> Self {
        self.dependency = dependency.to_string();
        self
    }

    /// Append every executed task identifier to a shared journal
    pub fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<TaskContext> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn dependency_name(&self) -> &str {
        &self.dependency
    }

    async fn execute(&self, context: TaskContext) -> Result<TaskOutput, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            journal.lock().push(context.task_identifier.clone());
        }
        self.contexts.lock().push(context);
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn default_output(task_type: TaskType) -> TaskOutput {
    TaskOutput::new(serde_json::json!({"generated": task_type.as_str()})).with_usage(TaskUsage {
        external_calls: 1,
        tokens_used: 250,
        estimated_cost: 0.01,
    })
}

pub fn timeout_error() -> HandlerError {
    HandlerError::Timeout {
        operation: "generate".to_string(),
        after: Duration::from_secs(30),
    }
}

/// Millisecond backoff and short polling so tests never wait on real delays
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.retry.backoff_base_ms = 1;
    config.retry.backoff_max_ms = 5;
    config.queue.poll_interval_ms = 5;
    config.workers.count = 3;
    config.workers.id_prefix = "test-worker".to_string();
    config
}

pub struct Harness {
    pub core: OrchestrationCore,
    pub store: Arc<InMemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let core = OrchestrationCore::new(config, store.clone(), store.clone())
            .expect("test configuration is valid");
        Self { core, store }
    }

    pub fn register(&self, handler: ScriptedHandler) -> Arc<ScriptedHandler> {
        let handler = Arc::new(handler);
        self.core.task_handler_registry.register(handler.clone());
        handler
    }

    /// Register a succeeding handler for every task type not yet covered
    pub fn register_defaults(&self) {
        for task_type in TaskType::ALL {
            if self.core.task_handler_registry.resolve(task_type).is_none() {
                self.register(ScriptedHandler::succeeding(task_type));
            }
        }
    }

    /// Run a single worker until no entry is pending, waiting out short retry delays
    pub async fn drain(&self) -> Vec<ExecutionOutcome> {
        let pool = self.core.worker_pool();
        let mut outcomes = Vec::new();
        for _ in 0..200 {
            outcomes.extend(pool.run_until_idle(TEST_WORKER).await.expect("store is healthy"));
            if self.store.depth().await.expect("store is healthy") == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        outcomes
    }
}

/// A ← none, B ← [A], C ← [A]
pub fn fan_out_job() -> NewJob {
    NewJob {
        owner_id: "owner-1".to_string(),
        tenant_id: "tenant-1".to_string(),
        request_payload: serde_json::json!({"topic": "graph theory"}),
        tasks: vec![
            TaskSpec::new("A", TaskType::KnowledgeAnalysis),
            TaskSpec::new("B", TaskType::OutlineGeneration).depends_on(["A"]),
            TaskSpec::new("C", TaskType::AssessmentGeneration).depends_on(["A"]),
        ],
    }
}

/// `count` independent lesson tasks
pub fn independent_job(count: usize) -> NewJob {
    NewJob {
        owner_id: "owner-1".to_string(),
        tenant_id: "tenant-1".to_string(),
        request_payload: serde_json::json!({}),
        tasks: (1..=count)
            .map(|n| TaskSpec::new(format!("lesson_{n}"), TaskType::LessonSection))
            .collect(),
    }
}
