//! # Analytics Record Model
//!
//! Derived per-job summary, recomputable at any time. Stored once per job in
//! `coursegen_analytics_records` (upserted on recomputation).

use crate::models::task::{TaskType, TaskUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Per task-type resource sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTypeSample {
    pub task_count: i32,
    pub completed: i32,
    pub total_duration_secs: f64,
    pub usage: TaskUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub job_id: Uuid,
    /// Sum of the durations of every terminal task
    pub total_task_time_secs: f64,
    /// Job completion minus job start, when both are known
    pub wall_clock_secs: Option<f64>,
    pub average_task_duration_secs: f64,
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub failed_tasks: i32,
    pub skipped_tasks: i32,
    /// `completed / total * 100`, two decimals
    pub success_rate: f64,
    pub total_retries: i32,
    pub usage: TaskUsage,
    pub samples: BTreeMap<TaskType, TaskTypeSample>,
    pub computed_at: DateTime<Utc>,
}
