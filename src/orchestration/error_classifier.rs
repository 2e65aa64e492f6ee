//! # Task Failure Classification
//!
//! Maps raw handler failures onto the orchestrator's failure taxonomy and
//! decides whether a failure is worth another attempt.
//!
//! ## Taxonomy
//!
//! | Category              | Typical cause                       | Recoverable | Severity      |
//! |-----------------------|-------------------------------------|-------------|---------------|
//! | `external_dependency` | timeouts, rate limits, outages      | yes         | medium        |
//! | `validation`          | malformed input or output           | no          | medium / high |
//! | `resource_exhaustion` | quota or capacity limits            | yes         | high          |
//! | `system`              | internal faults, missing handlers   | no          | critical      |
//! | `unknown`             | unrecognised failure signature      | yes         | medium        |
//!
//! A `critical` classification is never recoverable.
//!
//! ## Determinism
//!
//! Classification depends only on the error value and the [`ErrorContext`], so
//! the same failure signature always produces the same classification. Free-form
//! failures ([`HandlerError::Other`]) are matched on lower-cased message
//! signatures.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ HandlerError    │────▶│ ErrorClassifier │────▶│ Classification  │
//! │ + Context       │     │ Strategy        │     │ + Error Record  │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```

use crate::models::task::TaskType;
use crate::orchestration::task_handler::HandlerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Context information for error classification
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub task_identifier: String,
    pub task_type: TaskType,
    /// Current attempt number (1-based)
    pub attempt_number: u32,
    /// Maximum allowed attempts (`max_retries + 1`)
    pub max_attempts: u32,
    /// Breaker key of the dependency that was called
    pub dependency_name: String,
    /// How long the handler ran before failing
    pub execution_duration: Duration,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn is_final_attempt(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }
}

/// Primary error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ExternalDependency,
    Validation,
    ResourceExhaustion,
    System,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExternalDependency => "external_dependency",
            Self::Validation => "validation",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::System => "system",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "external_dependency" => Ok(Self::ExternalDependency),
            "validation" => Ok(Self::Validation),
            "resource_exhaustion" => Ok(Self::ResourceExhaustion),
            "system" => Ok(Self::System),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid error category: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid error severity: {s}")),
        }
    }
}

/// Result of error classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub recoverable: bool,
    /// Stable error code for tracking
    pub error_type: String,
    pub message: String,
    pub suggestions: Vec<String>,
    /// Minimum delay requested by the dependency (e.g. a rate-limit hint)
    pub retry_after: Option<Duration>,
    /// Structured context persisted with the error record
    pub context: serde_json::Value,
}

/// Trait for error classification strategies
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &HandlerError, context: &ErrorContext) -> ErrorClassification;

    fn classifier_name(&self) -> &'static str;
}

/// Standard classifier covering every [`HandlerError`] variant
#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier;

/// Intermediate verdict before context enrichment
struct Verdict {
    category: ErrorCategory,
    severity: ErrorSeverity,
    recoverable: bool,
    error_type: &'static str,
    retry_after: Option<Duration>,
}

impl Verdict {
    fn new(
        category: ErrorCategory,
        severity: ErrorSeverity,
        recoverable: bool,
        error_type: &'static str,
    ) -> Self {
        Self {
            category,
            severity,
            recoverable,
            error_type,
            retry_after: None,
        }
    }
}

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    fn verdict_for(&self, error: &HandlerError) -> Verdict {
        use ErrorCategory::*;
        use ErrorSeverity::*;

        match error {
            HandlerError::Timeout { .. } => {
                Verdict::new(ExternalDependency, Medium, true, "EXTERNAL_TIMEOUT")
            }
            HandlerError::RateLimited { retry_after, .. } => Verdict {
                retry_after: *retry_after,
                ..Verdict::new(ExternalDependency, Medium, true, "RATE_LIMITED")
            },
            HandlerError::Upstream(_) => {
                Verdict::new(ExternalDependency, Medium, true, "UPSTREAM_UNAVAILABLE")
            }
            HandlerError::CircuitOpen { .. } => {
                Verdict::new(ExternalDependency, Medium, true, "CIRCUIT_OPEN")
            }
            HandlerError::InvalidInput { .. } => {
                Verdict::new(Validation, Medium, false, "INVALID_INPUT")
            }
            HandlerError::InvalidOutput(_) => Verdict::new(Validation, High, false, "INVALID_OUTPUT"),
            HandlerError::ResourceExhausted(_) => {
                Verdict::new(ResourceExhaustion, High, true, "RESOURCE_EXHAUSTED")
            }
            HandlerError::Internal(_) => Verdict::new(System, Critical, false, "SYSTEM_FAULT"),
            HandlerError::Other(message) => self.verdict_for_message(message),
        }
    }

    /// Signature matching for unstructured failures
    fn verdict_for_message(&self, message: &str) -> Verdict {
        use ErrorCategory::*;
        use ErrorSeverity::*;

        let reason = message.to_lowercase();
        if reason.contains("timeout") || reason.contains("timed out") {
            Verdict::new(ExternalDependency, Medium, true, "EXTERNAL_TIMEOUT")
        } else if reason.contains("rate limit")
            || reason.contains("too many requests")
            || reason.contains("429")
        {
            Verdict::new(ExternalDependency, Medium, true, "RATE_LIMITED")
        } else if reason.contains("quota")
            || reason.contains("out of memory")
            || reason.contains("capacity")
            || reason.contains("exhausted")
        {
            Verdict::new(ResourceExhaustion, High, true, "RESOURCE_EXHAUSTED")
        } else if reason.contains("connection")
            || reason.contains("unavailable")
            || reason.contains("502")
            || reason.contains("503")
        {
            Verdict::new(ExternalDependency, Medium, true, "UPSTREAM_UNAVAILABLE")
        } else if reason.contains("invalid")
            || reason.contains("malformed")
            || reason.contains("schema")
            || reason.contains("parse")
        {
            Verdict::new(Validation, Medium, false, "VALIDATION_FAILED")
        } else if reason.contains("panic") || reason.contains("internal") {
            Verdict::new(System, Critical, false, "SYSTEM_FAULT")
        } else {
            Verdict::new(Unknown, Medium, true, "UNCLASSIFIED")
        }
    }

    fn suggestions_for(&self, error_type: &str, category: ErrorCategory) -> Vec<String> {
        let suggestions: &[&str] = match error_type {
            "EXTERNAL_TIMEOUT" => &[
                "Check provider latency and status",
                "Consider increasing the handler timeout",
                "Reduce the size of the generation request",
            ],
            "RATE_LIMITED" => &[
                "Reduce worker concurrency for this provider",
                "Review provider rate-limit tier",
            ],
            "CIRCUIT_OPEN" => &[
                "Wait for the dependency circuit breaker to recover",
                "Check provider status page",
            ],
            "INVALID_INPUT" => &[
                "Review the job request payload",
                "Correct the task input and retry manually",
            ],
            "INVALID_OUTPUT" => &[
                "Inspect the generated content for schema violations",
                "Adjust prompt templates for this task type",
            ],
            _ => match category {
                ErrorCategory::ExternalDependency => &[
                    "Verify the dependency is reachable",
                    "Retry after the dependency recovers",
                ],
                ErrorCategory::Validation => &["Review task input and output formats"],
                ErrorCategory::ResourceExhaustion => &[
                    "Check quota and capacity limits",
                    "Retry when resources become available",
                ],
                ErrorCategory::System => &[
                    "Inspect worker logs for the failing task",
                    "Verify a handler is registered for this task type",
                    "Skip the task or cancel the job",
                ],
                ErrorCategory::Unknown => &["Inspect the raw error message and task logs"],
            },
        };
        suggestions.iter().map(|s| (*s).to_string()).collect()
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify(&self, error: &HandlerError, context: &ErrorContext) -> ErrorClassification {
        let verdict = self.verdict_for(error);

        let mut severity = verdict.severity;
        // A recoverable failure on the last attempt ends the task; surface it louder.
        if verdict.recoverable && context.is_final_attempt() && severity < ErrorSeverity::High {
            severity = ErrorSeverity::High;
        }
        let recoverable = verdict.recoverable && severity != ErrorSeverity::Critical;

        let mut details = serde_json::Map::new();
        details.insert("task_identifier".into(), context.task_identifier.clone().into());
        details.insert("task_type".into(), context.task_type.as_str().into());
        details.insert("dependency".into(), context.dependency_name.clone().into());
        details.insert("attempt_number".into(), context.attempt_number.into());
        details.insert("max_attempts".into(), context.max_attempts.into());
        details.insert(
            "execution_duration_ms".into(),
            serde_json::json!(context.execution_duration.as_millis() as u64),
        );
        for (key, value) in &context.metadata {
            details.insert(key.clone(), value.clone());
        }

        ErrorClassification {
            category: verdict.category,
            severity,
            recoverable,
            error_type: verdict.error_type.to_string(),
            message: format!(
                "Task '{}' ({}) failed: {}",
                context.task_identifier, context.task_type, error
            ),
            suggestions: self.suggestions_for(verdict.error_type, verdict.category),
            retry_after: verdict.retry_after,
            context: serde_json::Value::Object(details),
        }
    }

    fn classifier_name(&self) -> &'static str {
        "standard"
    }
}

/// Highest severity among a set of failures, used for the job-level summary
pub fn rollup_severity<I>(severities: I) -> Option<ErrorSeverity>
where
    I: IntoIterator<Item = ErrorSeverity>,
{
    severities.into_iter().max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_context() -> ErrorContext {
        ErrorContext {
            job_id: Uuid::nil(),
            task_id: Uuid::nil(),
            task_identifier: "lesson_1".to_string(),
            task_type: TaskType::LessonSection,
            attempt_number: 1,
            max_attempts: 4,
            dependency_name: "content_model".to_string(),
            execution_duration: Duration::from_secs(12),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_timeout_classification() {
        let classifier = StandardErrorClassifier::new();
        let error = HandlerError::Timeout {
            operation: "generate_section".to_string(),
            after: Duration::from_secs(60),
        };

        let classification = classifier.classify(&error, &create_test_context());

        assert_eq!(classification.category, ErrorCategory::ExternalDependency);
        assert_eq!(classification.severity, ErrorSeverity::Medium);
        assert!(classification.recoverable);
        assert_eq!(classification.error_type, "EXTERNAL_TIMEOUT");
        assert!(!classification.suggestions.is_empty());
    }

    #[test]
    fn test_rate_limit_carries_retry_hint() {
        let classifier = StandardErrorClassifier::new();
        let error = HandlerError::RateLimited {
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_secs(20)),
        };

        let classification = classifier.classify(&error, &create_test_context());
        assert_eq!(classification.retry_after, Some(Duration::from_secs(20)));
        assert!(classification.recoverable);
    }

    #[test]
    fn test_system_fault_is_critical_and_not_recoverable() {
        let classifier = StandardErrorClassifier::new();
        let error = HandlerError::Internal("handler panicked".to_string());

        let classification = classifier.classify(&error, &create_test_context());
        assert_eq!(classification.category, ErrorCategory::System);
        assert_eq!(classification.severity, ErrorSeverity::Critical);
        assert!(!classification.recoverable);
    }

    #[test]
    fn test_validation_not_recoverable() {
        let classifier = StandardErrorClassifier::new();
        let input = HandlerError::InvalidInput {
            field: "topic".to_string(),
            reason: "empty".to_string(),
        };
        let output = HandlerError::InvalidOutput("missing learning objectives".to_string());

        let input_class = classifier.classify(&input, &create_test_context());
        let output_class = classifier.classify(&output, &create_test_context());

        assert_eq!(input_class.category, ErrorCategory::Validation);
        assert_eq!(input_class.severity, ErrorSeverity::Medium);
        assert!(!input_class.recoverable);
        assert_eq!(output_class.severity, ErrorSeverity::High);
        assert!(!output_class.recoverable);
    }

    #[test]
    fn test_resource_exhaustion_recoverable_high() {
        let classifier = StandardErrorClassifier::new();
        let error = HandlerError::ResourceExhausted("token quota".to_string());

        let classification = classifier.classify(&error, &create_test_context());
        assert_eq!(classification.category, ErrorCategory::ResourceExhaustion);
        assert_eq!(classification.severity, ErrorSeverity::High);
        assert!(classification.recoverable);
    }

    #[test]
    fn test_message_signatures() {
        let classifier = StandardErrorClassifier::new();
        let context = create_test_context();
        let cases = [
            ("Request timed out", "EXTERNAL_TIMEOUT"),
            ("HTTP 429 Too Many Requests", "RATE_LIMITED"),
            ("monthly quota reached", "RESOURCE_EXHAUSTED"),
            ("connection reset by peer", "UPSTREAM_UNAVAILABLE"),
            ("malformed JSON in completion", "VALIDATION_FAILED"),
            ("internal invariant broken", "SYSTEM_FAULT"),
            ("something odd happened", "UNCLASSIFIED"),
        ];

        for (message, expected) in cases {
            let classification =
                classifier.classify(&HandlerError::Other(message.to_string()), &context);
            assert_eq!(classification.error_type, expected, "message: {message}");
        }
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = StandardErrorClassifier::new();
        let context = create_test_context();
        let error = HandlerError::Upstream("provider returned 503".to_string());

        let first = classifier.classify(&error, &context);
        let second = classifier.classify(&error, &context);
        assert_eq!(first, second);
    }

    #[test]
    fn test_final_attempt_escalates_severity() {
        let classifier = StandardErrorClassifier::new();
        let mut context = create_test_context();
        context.attempt_number = 4;

        let classification = classifier.classify(
            &HandlerError::Upstream("provider down".to_string()),
            &context,
        );
        assert_eq!(classification.severity, ErrorSeverity::High);
        assert!(classification.recoverable);
    }

    #[test]
    fn test_rollup_severity() {
        assert_eq!(rollup_severity(Vec::new()), None);
        assert_eq!(
            rollup_severity([ErrorSeverity::Medium, ErrorSeverity::Critical, ErrorSeverity::Low]),
            Some(ErrorSeverity::Critical)
        );
    }
}
