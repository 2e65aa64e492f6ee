//! # User Action Model
//!
//! Append-only audit trail of operator recovery requests. Rejected requests are
//! recorded too. Maps to `coursegen_user_actions`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    RetryTask,
    SkipTask,
    CancelJob,
    ModifyConfig,
    PauseJob,
    ResumeJob,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryTask => "retry_task",
            Self::SkipTask => "skip_task",
            Self::CancelJob => "cancel_job",
            Self::ModifyConfig => "modify_config",
            Self::PauseJob => "pause_job",
            Self::ResumeJob => "resume_job",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry_task" => Ok(Self::RetryTask),
            "skip_task" => Ok(Self::SkipTask),
            "cancel_job" => Ok(Self::CancelJob),
            "modify_config" => Ok(Self::ModifyConfig),
            "pause_job" => Ok(Self::PauseJob),
            "resume_job" => Ok(Self::ResumeJob),
            _ => Err(format!("Invalid action type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActionRecord {
    pub action_id: Uuid,
    pub job_id: Uuid,
    pub actor: String,
    pub action_type: ActionType,
    pub task_ids: Vec<Uuid>,
    pub success: bool,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
