//! # Task Model
//!
//! One unit of work inside a job.
//!
//! ## Database Schema
//!
//! Maps to `coursegen_tasks`:
//! - `task_id`: Primary key (UUID)
//! - `job_id`: Owning job
//! - `task_identifier`: Symbolic name, unique within the job, used by `dependencies`
//! - `dependencies`: TEXT[] of symbolic identifiers (not foreign keys, so a graph
//!   may be declared before every task exists)
//! - `sequence`: creation order, the deterministic tie-break for equal priorities

use crate::constants::DEFAULT_TASK_PRIORITY;
use crate::orchestration::error_classifier::{ErrorCategory, ErrorClassification, ErrorSeverity};
use crate::state_machine::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of content a task produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    KnowledgeAnalysis,
    OutlineGeneration,
    LessonSection,
    AssessmentGeneration,
    Validation,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::KnowledgeAnalysis,
        TaskType::OutlineGeneration,
        TaskType::LessonSection,
        TaskType::AssessmentGeneration,
        TaskType::Validation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KnowledgeAnalysis => "knowledge_analysis",
            Self::OutlineGeneration => "outline_generation",
            Self::LessonSection => "lesson_section",
            Self::AssessmentGeneration => "assessment_generation",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "knowledge_analysis" => Ok(Self::KnowledgeAnalysis),
            "outline_generation" => Ok(Self::OutlineGeneration),
            "lesson_section" => Ok(Self::LessonSection),
            "assessment_generation" => Ok(Self::AssessmentGeneration),
            "validation" => Ok(Self::Validation),
            _ => Err(format!("Invalid task type: {s}")),
        }
    }
}

/// External-call accounting reported by a handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUsage {
    pub external_calls: i64,
    pub tokens_used: i64,
    pub estimated_cost: f64,
}

impl std::ops::AddAssign for TaskUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.external_calls += rhs.external_calls;
        self.tokens_used += rhs.tokens_used;
        self.estimated_cost += rhs.estimated_cost;
    }
}

/// Declaration of a task at decomposition time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_identifier: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub input_payload: serde_json::Value,
}

impl TaskSpec {
    pub fn new(task_identifier: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            task_identifier: task_identifier.into(),
            task_type,
            dependencies: Vec::new(),
            priority: DEFAULT_TASK_PRIORITY,
            max_retries: None,
            input_payload: serde_json::Value::Null,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input_payload = input;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub task_identifier: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub dependencies: Vec<String>,
    pub priority: i32,
    pub sequence: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub input_payload: serde_json::Value,
    pub output_payload: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_severity: Option<ErrorSeverity>,
    pub error_category: Option<ErrorCategory>,
    pub error_recoverable: Option<bool>,
    pub error_suggestions: Vec<String>,
    pub usage: TaskUsage,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Materialize a task row from its declaration
    pub fn from_spec(
        job_id: Uuid,
        spec: &TaskSpec,
        sequence: i32,
        default_max_retries: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            job_id,
            task_identifier: spec.task_identifier.clone(),
            task_type: spec.task_type,
            status: TaskStatus::Pending,
            dependencies: spec.dependencies.clone(),
            priority: spec.priority,
            sequence,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            input_payload: spec.input_payload.clone(),
            output_payload: None,
            error_message: None,
            error_severity: None,
            error_category: None,
            error_recoverable: None,
            error_suggestions: Vec::new(),
            usage: TaskUsage::default(),
            created_at: now,
            queued_at: None,
            started_at: None,
            completed_at: None,
            last_retry_at: None,
        }
    }

    /// Wall time between start and completion, when both are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }

    pub fn record_error(&mut self, classification: &ErrorClassification) {
        self.error_message = Some(classification.message.clone());
        self.error_severity = Some(classification.severity);
        self.error_category = Some(classification.category);
        self.error_recoverable = Some(classification.recoverable);
        self.error_suggestions = classification.suggestions.clone();
    }

    pub fn clear_error(&mut self) {
        self.error_message = None;
        self.error_severity = None;
        self.error_category = None;
        self.error_recoverable = None;
        self.error_suggestions.clear();
    }

    /// Failed tasks stay retryable by operators unless the last failure was classified otherwise
    pub fn is_recoverable(&self) -> bool {
        self.error_recoverable.unwrap_or(true)
            && self.error_severity != Some(ErrorSeverity::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_from_spec_uses_default_retries() {
        let spec = TaskSpec::new("outline", TaskType::OutlineGeneration).depends_on(["analysis"]);
        let task = Task::from_spec(Uuid::new_v4(), &spec, 1, 3, Utc::now());
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.dependencies, vec!["analysis".to_string()]);

        let spec = spec.with_max_retries(1);
        let task = Task::from_spec(Uuid::new_v4(), &spec, 1, 3, Utc::now());
        assert_eq!(task.max_retries, 1);
    }

    #[test]
    fn test_duration_requires_both_timestamps() {
        let now = Utc::now();
        let spec = TaskSpec::new("a", TaskType::LessonSection);
        let mut task = Task::from_spec(Uuid::new_v4(), &spec, 0, 3, now);
        assert!(task.duration().is_none());

        task.started_at = Some(now);
        task.completed_at = Some(now + Duration::seconds(45));
        assert_eq!(task.duration(), Some(Duration::seconds(45)));
    }

    #[test]
    fn test_task_type_round_trip_names() {
        for task_type in TaskType::ALL {
            assert_eq!(task_type.as_str().parse::<TaskType>().unwrap(), task_type);
        }
    }
}
