//! # Course Planner
//!
//! Default decomposition of a course request into the standard generation
//! pipeline:
//!
//! ```text
//! knowledge_analysis -> outline_generation -> lesson_section_1..n -> assessment_generation -> validation
//! ```
//!
//! Lesson sections only depend on the outline, so they can run in parallel.
//! Earlier pipeline stages carry higher priority so that a busy queue keeps
//! pushing jobs toward their first lessons instead of starting new jobs.

use crate::error::{TaskerError, TaskerResult};
use crate::models::{TaskSpec, TaskType};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const KNOWLEDGE_ANALYSIS: &str = "knowledge_analysis";
pub const OUTLINE_GENERATION: &str = "outline_generation";
pub const ASSESSMENT_GENERATION: &str = "assessment_generation";
pub const VALIDATION: &str = "validation";

/// Identifier of the n-th lesson section (1-based)
pub fn lesson_identifier(lesson_number: u32) -> String {
    format!("lesson_section_{lesson_number}")
}

/// Priority and retry budget for one pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSettings {
    pub priority: i32,
    pub max_retries: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub default_lesson_count: u32,
    pub max_lesson_count: u32,
    pub knowledge_analysis: StageSettings,
    pub outline_generation: StageSettings,
    pub lesson_section: StageSettings,
    pub assessment_generation: StageSettings,
    pub validation: StageSettings,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_lesson_count: 3,
            max_lesson_count: 50,
            knowledge_analysis: StageSettings {
                priority: 50,
                max_retries: 3,
            },
            outline_generation: StageSettings {
                priority: 40,
                max_retries: 3,
            },
            lesson_section: StageSettings {
                priority: 30,
                max_retries: 2,
            },
            assessment_generation: StageSettings {
                priority: 20,
                max_retries: 2,
            },
            validation: StageSettings {
                priority: 10,
                max_retries: 1,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoursePlanner {
    config: PlannerConfig,
}

impl CoursePlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Decompose a course request into task declarations
    ///
    /// The request must be a JSON object; `lesson_count` is optional and
    /// falls back to the configured default. Every task receives the full
    /// request as input, lessons additionally their `lesson_number`.
    pub fn plan(&self, request: &serde_json::Value) -> TaskerResult<Vec<TaskSpec>> {
        let serde_json::Value::Object(fields) = request else {
            return Err(TaskerError::ValidationError(
                "course request must be a JSON object".to_string(),
            ));
        };
        let lesson_count = match fields.get("lesson_count") {
            None | Some(serde_json::Value::Null) => self.config.default_lesson_count,
            Some(value) => value
                .as_u64()
                .and_then(|count| u32::try_from(count).ok())
                .ok_or_else(|| {
                    TaskerError::ValidationError(format!(
                        "lesson_count must be a non-negative integer, got {value}"
                    ))
                })?,
        };
        if lesson_count == 0 || lesson_count > self.config.max_lesson_count {
            return Err(TaskerError::ValidationError(format!(
                "lesson_count must be between 1 and {}, got {lesson_count}",
                self.config.max_lesson_count
            )));
        }

        let stage = |identifier: String, task_type: TaskType, settings: StageSettings| {
            TaskSpec::new(identifier, task_type)
                .with_priority(settings.priority)
                .with_max_retries(settings.max_retries)
                .with_input(request.clone())
        };

        let lessons: Vec<String> = (1..=lesson_count).map(lesson_identifier).collect();
        let mut specs = Vec::with_capacity(lessons.len() + 4);
        specs.push(stage(
            KNOWLEDGE_ANALYSIS.to_string(),
            TaskType::KnowledgeAnalysis,
            self.config.knowledge_analysis,
        ));
        specs.push(
            stage(
                OUTLINE_GENERATION.to_string(),
                TaskType::OutlineGeneration,
                self.config.outline_generation,
            )
            .depends_on([KNOWLEDGE_ANALYSIS]),
        );
        for (index, identifier) in lessons.iter().enumerate() {
            let mut input = request.clone();
            if let serde_json::Value::Object(map) = &mut input {
                map.insert("lesson_number".to_string(), serde_json::json!(index + 1));
            }
            specs.push(
                stage(
                    identifier.clone(),
                    TaskType::LessonSection,
                    self.config.lesson_section,
                )
                .depends_on([OUTLINE_GENERATION])
                .with_input(input),
            );
        }
        specs.push(
            stage(
                ASSESSMENT_GENERATION.to_string(),
                TaskType::AssessmentGeneration,
                self.config.assessment_generation,
            )
            .depends_on(lessons.iter().cloned()),
        );
        specs.push(
            stage(VALIDATION.to_string(), TaskType::Validation, self.config.validation)
                .depends_on([ASSESSMENT_GENERATION]),
        );

        debug!(lesson_count, tasks = specs.len(), "Planned course pipeline");
        Ok(specs)
    }
}
