//! # Error Record Model
//!
//! Append-only log of every classified failure, written whether or not the
//! owning task later recovers. Maps to `coursegen_error_records`.

use crate::orchestration::error_classifier::{ErrorCategory, ErrorClassification, ErrorSeverity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What happened to the task right after the failure was classified.
///
/// Records are never rewritten, so a task that later succeeds keeps its
/// `retrying` and `deferred` rows; its recovery shows in the task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Scheduled for another attempt
    Retrying,
    /// No further attempts
    Failed,
    /// The dependency's breaker rejected the call; no attempt was counted
    Deferred,
}

impl ResolutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
        }
    }
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResolutionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retrying" => Ok(Self::Retrying),
            "failed" => Ok(Self::Failed),
            "deferred" => Ok(Self::Deferred),
            _ => Err(format!("Invalid resolution outcome: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_id: Uuid,
    pub job_id: Uuid,
    pub task_id: Option<Uuid>,
    pub error_type: String,
    pub severity: ErrorSeverity,
    pub category: ErrorCategory,
    pub message: String,
    pub context: serde_json::Value,
    pub recoverable: bool,
    pub suggestions: Vec<String>,
    pub retry_count: i32,
    pub resolution: ResolutionOutcome,
    pub created_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn from_classification(
        job_id: Uuid,
        task_id: Option<Uuid>,
        classification: &ErrorClassification,
        retry_count: i32,
        resolution: ResolutionOutcome,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            error_id: Uuid::new_v4(),
            job_id,
            task_id,
            error_type: classification.error_type.clone(),
            severity: classification.severity,
            category: classification.category,
            message: classification.message.clone(),
            context: classification.context.clone(),
            recoverable: classification.recoverable,
            suggestions: classification.suggestions.clone(),
            retry_count,
            resolution,
            created_at: now,
        }
    }
}
