//! Error types for the course-generation orchestrator.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskerError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
    #[error("Orchestration error: {0}")]
    OrchestrationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Job {0} not found")]
    JobNotFound(Uuid),
    #[error("Task {0} not found")]
    TaskNotFound(Uuid),
    #[error("Queue entry {0} not found")]
    QueueEntryNotFound(Uuid),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TaskerError {
    fn from(error: serde_json::Error) -> Self {
        TaskerError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for TaskerError {
    fn from(err: sqlx::Error) -> Self {
        TaskerError::DatabaseError(err.to_string())
    }
}

impl From<config::ConfigError> for TaskerError {
    fn from(err: config::ConfigError) -> Self {
        TaskerError::ConfigurationError(err.to_string())
    }
}

pub type TaskerResult<T> = std::result::Result<T, TaskerError>;
