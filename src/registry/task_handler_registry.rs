//! # Task Handler Registry
//!
//! In-process map from task type to the injected handler. Each worker process
//! registers its handlers at bootstrap; the executor resolves them per task.

use crate::models::task::TaskType;
use crate::orchestration::task_handler::TaskHandler;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default)]
pub struct TaskHandlerRegistry {
    handlers: DashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for TaskHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandlerRegistry")
            .field("task_types", &self.registered_types())
            .finish()
    }
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler for the same task type
    pub fn register(&self, handler: Arc<dyn TaskHandler>) {
        let task_type = handler.task_type();
        let dependency = handler.dependency_name().to_string();
        if self.handlers.insert(task_type, handler).is_some() {
            warn!(task_type = %task_type, "Replaced existing task handler");
        }
        info!(
            task_type = %task_type,
            dependency = %dependency,
            "Registered task handler"
        );
    }

    pub fn resolve(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .get(&task_type)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.iter().map(|entry| *entry.key()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::task_handler::{HandlerError, TaskContext, TaskOutput};
    use async_trait::async_trait;

    struct StaticHandler(TaskType);

    #[async_trait]
    impl TaskHandler for StaticHandler {
        fn task_type(&self) -> TaskType {
            self.0
        }

        fn dependency_name(&self) -> &str {
            "static"
        }

        async fn execute(&self, _context: TaskContext) -> Result<TaskOutput, HandlerError> {
            Ok(TaskOutput::default())
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = TaskHandlerRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(StaticHandler(TaskType::Validation)));
        registry.register(Arc::new(StaticHandler(TaskType::KnowledgeAnalysis)));

        assert_eq!(registry.len(), 2);
        assert!(registry.resolve(TaskType::Validation).is_some());
        assert!(registry.resolve(TaskType::LessonSection).is_none());
        assert_eq!(
            registry.registered_types(),
            vec![TaskType::KnowledgeAnalysis, TaskType::Validation]
        );
    }
}
