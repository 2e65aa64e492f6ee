//! # Task Handler Contract
//!
//! The content-generation capability is injected per task type. Handlers are
//! opaque to the orchestrator: they receive the task input plus the outputs of
//! its dependencies and return a payload with usage accounting, or a
//! [`HandlerError`] that the error classifier maps onto the failure taxonomy.
//!
//! Each handler names the external dependency it calls. That name keys the
//! circuit breaker guarding the call, so one provider outage does not exhaust
//! retry budgets of tasks that talk to something else.
//!
//! ```rust
//! use async_trait::async_trait;
//! use coursegen_core::models::TaskType;
//! use coursegen_core::orchestration::{HandlerError, TaskContext, TaskHandler, TaskOutput};
//! use std::collections::HashMap;
//!
//! struct OutlineHandler;
//!
//! #[async_trait]
//! impl TaskHandler for OutlineHandler {
//!     fn task_type(&self) -> TaskType {
//!         TaskType::OutlineGeneration
//!     }
//!
//!     fn dependency_name(&self) -> &str {
//!         "outline_model"
//!     }
//!
//!     async fn execute(&self, context: TaskContext) -> Result<TaskOutput, HandlerError> {
//!         let topic = context.job_request["topic"].as_str().unwrap_or("untitled");
//!         Ok(TaskOutput::new(serde_json::json!({ "title": topic })))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let context = TaskContext {
//!     job_id: uuid::Uuid::new_v4(),
//!     task_id: uuid::Uuid::new_v4(),
//!     task_identifier: "outline_generation".to_string(),
//!     task_type: TaskType::OutlineGeneration,
//!     attempt: 1,
//!     input: serde_json::Value::Null,
//!     job_request: serde_json::json!({ "topic": "ownership" }),
//!     dependency_outputs: HashMap::new(),
//! };
//! let output = OutlineHandler.execute(context).await.unwrap();
//! assert_eq!(output.payload["title"], "ownership");
//! # });
//! ```

use crate::models::task::{TaskType, TaskUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a task handler
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
    #[error("rate limited by provider: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("upstream unavailable: {0}")]
    Upstream(String),
    #[error("invalid input for field '{field}': {reason}")]
    InvalidInput { field: String, reason: String },
    #[error("invalid output: {0}")]
    InvalidOutput(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("internal fault: {0}")]
    Internal(String),
    #[error("circuit breaker open for {dependency}")]
    CircuitOpen { dependency: String },
    #[error("{0}")]
    Other(String),
}

/// Everything a handler sees about the task it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub task_identifier: String,
    pub task_type: TaskType,
    /// 1-based attempt number
    pub attempt: i32,
    pub input: serde_json::Value,
    pub job_request: serde_json::Value,
    /// Outputs of completed dependencies keyed by symbolic identifier
    pub dependency_outputs: HashMap<String, serde_json::Value>,
}

/// Successful handler result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub payload: serde_json::Value,
    pub usage: TaskUsage,
}

impl TaskOutput {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            usage: TaskUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TaskUsage) -> Self {
        self.usage = usage;
        self
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Task type this handler serves
    fn task_type(&self) -> TaskType;

    /// External dependency name; keys the circuit breaker
    fn dependency_name(&self) -> &str;

    async fn execute(&self, context: TaskContext) -> Result<TaskOutput, HandlerError>;
}
