//! # PostgreSQL Store
//!
//! [`JobStore`] and [`WorkQueue`] over PostgreSQL using runtime-checked `sqlx`
//! queries. Rows are read into `FromRow` structs with text-typed statuses and
//! converted into the domain models, so a corrupt status surfaces as a
//! [`TaskerError::DatabaseError`] instead of a panic.
//!
//! Claiming is a single `UPDATE ... WHERE entry_id = (SELECT ... FOR UPDATE
//! SKIP LOCKED LIMIT 1) RETURNING *` statement: competing workers skip rows
//! another transaction is claiming instead of blocking on them, and no two
//! workers can ever update the same pending row.
//!
//! A partial unique index keeps one `pending` entry per task. Enqueue inserts
//! with `ON CONFLICT DO NOTHING` and falls back to the existing row; statements
//! that put a claimed entry back to `pending` fold it into a pending sibling
//! instead of violating the index.

use super::{lease_to_chrono, JobStore, WorkQueue};
use crate::error::{TaskerError, TaskerResult};
use crate::models::{
    calculate_job_completion_percentage, AnalyticsRecord, ErrorRecord, Job, NewQueueEntry,
    QueueEntry, Task, TaskCounts, TaskUsage, UserActionRecord,
};
use crate::state_machine::{JobStatus, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Insert/read-back rounds before enqueue gives up on a contended task
const ENQUEUE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn job_exists(&self, job_id: Uuid) -> TaskerResult<bool> {
        let found: Option<(Uuid,)> =
            sqlx::query_as("SELECT job_id FROM coursegen_jobs WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn task_exists(&self, task_id: Uuid) -> TaskerResult<bool> {
        let found: Option<(Uuid,)> =
            sqlx::query_as("SELECT task_id FROM coursegen_tasks WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

fn parse_column<T: FromStr<Err = String>>(column: &str, value: &str) -> TaskerResult<T> {
    value
        .parse()
        .map_err(|e| TaskerError::DatabaseError(format!("corrupt {column}: {e}")))
}

fn parse_optional<T: FromStr<Err = String>>(
    column: &str,
    value: Option<&str>,
) -> TaskerResult<Option<T>> {
    value.map(|v| parse_column(column, v)).transpose()
}

#[derive(Debug, FromRow)]
struct JobRow {
    job_id: Uuid,
    owner_id: String,
    tenant_id: String,
    status: String,
    progress_percentage: f64,
    total_tasks: i32,
    completed_tasks: i32,
    failed_tasks: i32,
    skipped_tasks: i32,
    request_payload: serde_json::Value,
    result_payload: Option<serde_json::Value>,
    error_summary: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = TaskerError;

    fn try_from(row: JobRow) -> TaskerResult<Self> {
        Ok(Job {
            job_id: row.job_id,
            owner_id: row.owner_id,
            tenant_id: row.tenant_id,
            status: parse_column("job status", &row.status)?,
            progress_percentage: row.progress_percentage,
            total_tasks: row.total_tasks,
            completed_tasks: row.completed_tasks,
            failed_tasks: row.failed_tasks,
            skipped_tasks: row.skipped_tasks,
            request_payload: row.request_payload,
            result_payload: row.result_payload,
            error_summary: row.error_summary,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TaskRow {
    task_id: Uuid,
    job_id: Uuid,
    task_identifier: String,
    task_type: String,
    status: String,
    dependencies: Vec<String>,
    priority: i32,
    sequence: i32,
    retry_count: i32,
    max_retries: i32,
    input_payload: serde_json::Value,
    output_payload: Option<serde_json::Value>,
    error_message: Option<String>,
    error_severity: Option<String>,
    error_category: Option<String>,
    error_recoverable: Option<bool>,
    error_suggestions: Vec<String>,
    external_calls: i64,
    tokens_used: i64,
    estimated_cost: f64,
    created_at: DateTime<Utc>,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_retry_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = TaskerError;

    fn try_from(row: TaskRow) -> TaskerResult<Self> {
        Ok(Task {
            task_id: row.task_id,
            job_id: row.job_id,
            task_identifier: row.task_identifier,
            task_type: parse_column("task type", &row.task_type)?,
            status: parse_column("task status", &row.status)?,
            dependencies: row.dependencies,
            priority: row.priority,
            sequence: row.sequence,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            input_payload: row.input_payload,
            output_payload: row.output_payload,
            error_message: row.error_message,
            error_severity: parse_optional("error severity", row.error_severity.as_deref())?,
            error_category: parse_optional("error category", row.error_category.as_deref())?,
            error_recoverable: row.error_recoverable,
            error_suggestions: row.error_suggestions,
            usage: TaskUsage {
                external_calls: row.external_calls,
                tokens_used: row.tokens_used,
                estimated_cost: row.estimated_cost,
            },
            created_at: row.created_at,
            queued_at: row.queued_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            last_retry_at: row.last_retry_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct QueueEntryRow {
    entry_id: Uuid,
    job_id: Uuid,
    task_id: Option<Uuid>,
    priority: i32,
    scheduled_for: DateTime<Utc>,
    status: String,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = TaskerError;

    fn try_from(row: QueueEntryRow) -> TaskerResult<Self> {
        Ok(QueueEntry {
            entry_id: row.entry_id,
            job_id: row.job_id,
            task_id: row.task_id,
            priority: row.priority,
            scheduled_for: row.scheduled_for,
            status: parse_column("queue entry status", &row.status)?,
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at,
            retry_count: row.retry_count,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ErrorRecordRow {
    error_id: Uuid,
    job_id: Uuid,
    task_id: Option<Uuid>,
    error_type: String,
    severity: String,
    category: String,
    message: String,
    context: serde_json::Value,
    recoverable: bool,
    suggestions: Vec<String>,
    retry_count: i32,
    resolution: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ErrorRecordRow> for ErrorRecord {
    type Error = TaskerError;

    fn try_from(row: ErrorRecordRow) -> TaskerResult<Self> {
        Ok(ErrorRecord {
            error_id: row.error_id,
            job_id: row.job_id,
            task_id: row.task_id,
            error_type: row.error_type,
            severity: parse_column("error severity", &row.severity)?,
            category: parse_column("error category", &row.category)?,
            message: row.message,
            context: row.context,
            recoverable: row.recoverable,
            suggestions: row.suggestions,
            retry_count: row.retry_count,
            resolution: parse_column("error resolution", &row.resolution)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserActionRow {
    action_id: Uuid,
    job_id: Uuid,
    actor: String,
    action_type: String,
    task_ids: Vec<Uuid>,
    success: bool,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserActionRow> for UserActionRecord {
    type Error = TaskerError;

    fn try_from(row: UserActionRow) -> TaskerResult<Self> {
        Ok(UserActionRecord {
            action_id: row.action_id,
            job_id: row.job_id,
            actor: row.actor,
            action_type: parse_column("action type", &row.action_type)?,
            task_ids: row.task_ids,
            success: row.success,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AnalyticsRow {
    job_id: Uuid,
    total_task_time_secs: f64,
    wall_clock_secs: Option<f64>,
    average_task_duration_secs: f64,
    total_tasks: i32,
    completed_tasks: i32,
    failed_tasks: i32,
    skipped_tasks: i32,
    success_rate: f64,
    total_retries: i32,
    external_calls: i64,
    tokens_used: i64,
    estimated_cost: f64,
    samples: serde_json::Value,
    computed_at: DateTime<Utc>,
}

impl TryFrom<AnalyticsRow> for AnalyticsRecord {
    type Error = TaskerError;

    fn try_from(row: AnalyticsRow) -> TaskerResult<Self> {
        Ok(AnalyticsRecord {
            job_id: row.job_id,
            total_task_time_secs: row.total_task_time_secs,
            wall_clock_secs: row.wall_clock_secs,
            average_task_duration_secs: row.average_task_duration_secs,
            total_tasks: row.total_tasks,
            completed_tasks: row.completed_tasks,
            failed_tasks: row.failed_tasks,
            skipped_tasks: row.skipped_tasks,
            success_rate: row.success_rate,
            total_retries: row.total_retries,
            usage: TaskUsage {
                external_calls: row.external_calls,
                tokens_used: row.tokens_used,
                estimated_cost: row.estimated_cost,
            },
            samples: serde_json::from_value(row.samples)?,
            computed_at: row.computed_at,
        })
    }
}

const INSERT_TASK: &str = r#"
    INSERT INTO coursegen_tasks (
        task_id, job_id, task_identifier, task_type, status, dependencies, priority,
        sequence, retry_count, max_retries, input_payload, output_payload, error_message,
        error_severity, error_category, error_recoverable, error_suggestions,
        external_calls, tokens_used, estimated_cost, created_at, queued_at, started_at,
        completed_at, last_retry_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
        $18, $19, $20, $21, $22, $23, $24, $25
    )
"#;

#[async_trait]
impl JobStore for PgStore {
    #[instrument(skip(self, job, tasks), fields(job_id = %job.job_id, tasks = tasks.len()))]
    async fn create_job(&self, job: &Job, tasks: &[Task]) -> TaskerResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO coursegen_jobs (
                job_id, owner_id, tenant_id, status, progress_percentage, total_tasks,
                completed_tasks, failed_tasks, skipped_tasks, request_payload, result_payload,
                error_summary, created_at, started_at, completed_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(job.job_id)
        .bind(&job.owner_id)
        .bind(&job.tenant_id)
        .bind(job.status.as_str())
        .bind(job.progress_percentage)
        .bind(job.total_tasks)
        .bind(job.completed_tasks)
        .bind(job.failed_tasks)
        .bind(job.skipped_tasks)
        .bind(&job.request_payload)
        .bind(&job.result_payload)
        .bind(&job.error_summary)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        for task in tasks {
            sqlx::query(INSERT_TASK)
                .bind(task.task_id)
                .bind(task.job_id)
                .bind(&task.task_identifier)
                .bind(task.task_type.as_str())
                .bind(task.status.as_str())
                .bind(&task.dependencies)
                .bind(task.priority)
                .bind(task.sequence)
                .bind(task.retry_count)
                .bind(task.max_retries)
                .bind(&task.input_payload)
                .bind(&task.output_payload)
                .bind(&task.error_message)
                .bind(task.error_severity.map(|s| s.as_str()))
                .bind(task.error_category.map(|c| c.as_str()))
                .bind(task.error_recoverable)
                .bind(&task.error_suggestions)
                .bind(task.usage.external_calls)
                .bind(task.usage.tokens_used)
                .bind(task.usage.estimated_cost)
                .bind(task.created_at)
                .bind(task.queued_at)
                .bind(task.started_at)
                .bind(task.completed_at)
                .bind(task.last_retry_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> TaskerResult<Job> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM coursegen_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(TaskerError::JobNotFound(job_id))?.try_into()
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> TaskerResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM coursegen_jobs WHERE status = $1 ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id, to = %job.status))]
    async fn update_job(&self, job: &Job, expected: JobStatus) -> TaskerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE coursegen_jobs
            SET status = $2, progress_percentage = $3, total_tasks = $4, completed_tasks = $5,
                failed_tasks = $6, skipped_tasks = $7, result_payload = $8, error_summary = $9,
                started_at = $10, completed_at = $11, updated_at = $12
            WHERE job_id = $1 AND status = $13
            "#,
        )
        .bind(job.job_id)
        .bind(job.status.as_str())
        .bind(job.progress_percentage)
        .bind(job.total_tasks)
        .bind(job.completed_tasks)
        .bind(job.failed_tasks)
        .bind(job.skipped_tasks)
        .bind(&job.result_payload)
        .bind(&job.error_summary)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if !self.job_exists(job.job_id).await? {
            return Err(TaskerError::JobNotFound(job.job_id));
        }
        debug!(expected = %expected, "Job update lost compare-and-set");
        Ok(false)
    }

    async fn update_job_progress(
        &self,
        job_id: Uuid,
        counts: &TaskCounts,
        now: DateTime<Utc>,
    ) -> TaskerResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE coursegen_jobs
            SET total_tasks = $2, completed_tasks = $3, failed_tasks = $4, skipped_tasks = $5,
                progress_percentage = $6,
                updated_at = CASE
                    WHEN (total_tasks, completed_tasks, failed_tasks, skipped_tasks)
                        IS DISTINCT FROM ($2, $3, $4, $5)
                    THEN $7
                    ELSE updated_at
                END
            WHERE job_id = $1
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(counts.total)
        .bind(counts.completed)
        .bind(counts.failed)
        .bind(counts.skipped)
        .bind(calculate_job_completion_percentage(counts.completed, counts.total))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(TaskerError::JobNotFound(job_id))?.try_into()
    }

    async fn get_task(&self, task_id: Uuid) -> TaskerResult<Task> {
        let row =
            sqlx::query_as::<_, TaskRow>("SELECT * FROM coursegen_tasks WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or(TaskerError::TaskNotFound(task_id))?.try_into()
    }

    async fn list_tasks(&self, job_id: Uuid) -> TaskerResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM coursegen_tasks WHERE job_id = $1 ORDER BY sequence",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    #[instrument(skip(self, task), fields(task_id = %task.task_id, to = %task.status))]
    async fn update_task(&self, task: &Task, expected: TaskStatus) -> TaskerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE coursegen_tasks
            SET status = $2, retry_count = $3, max_retries = $4, input_payload = $5,
                output_payload = $6, error_message = $7, error_severity = $8,
                error_category = $9, error_recoverable = $10, error_suggestions = $11,
                external_calls = $12, tokens_used = $13, estimated_cost = $14,
                queued_at = $15, started_at = $16, completed_at = $17, last_retry_at = $18
            WHERE task_id = $1 AND status = $19
            "#,
        )
        .bind(task.task_id)
        .bind(task.status.as_str())
        .bind(task.retry_count)
        .bind(task.max_retries)
        .bind(&task.input_payload)
        .bind(&task.output_payload)
        .bind(&task.error_message)
        .bind(task.error_severity.map(|s| s.as_str()))
        .bind(task.error_category.map(|c| c.as_str()))
        .bind(task.error_recoverable)
        .bind(&task.error_suggestions)
        .bind(task.usage.external_calls)
        .bind(task.usage.tokens_used)
        .bind(task.usage.estimated_cost)
        .bind(task.queued_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.last_retry_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if !self.task_exists(task.task_id).await? {
            return Err(TaskerError::TaskNotFound(task.task_id));
        }
        debug!(expected = %expected, "Task update lost compare-and-set");
        Ok(false)
    }

    async fn record_error(&self, record: &ErrorRecord) -> TaskerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO coursegen_error_records (
                error_id, job_id, task_id, error_type, severity, category, message, context,
                recoverable, suggestions, retry_count, resolution, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.error_id)
        .bind(record.job_id)
        .bind(record.task_id)
        .bind(&record.error_type)
        .bind(record.severity.as_str())
        .bind(record.category.as_str())
        .bind(&record.message)
        .bind(&record.context)
        .bind(record.recoverable)
        .bind(&record.suggestions)
        .bind(record.retry_count)
        .bind(record.resolution.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_errors(&self, job_id: Uuid) -> TaskerResult<Vec<ErrorRecord>> {
        let rows = sqlx::query_as::<_, ErrorRecordRow>(
            "SELECT * FROM coursegen_error_records WHERE job_id = $1 ORDER BY created_at",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ErrorRecord::try_from).collect()
    }

    async fn record_action(&self, record: &UserActionRecord) -> TaskerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO coursegen_user_actions (
                action_id, job_id, actor, action_type, task_ids, success, message, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.action_id)
        .bind(record.job_id)
        .bind(&record.actor)
        .bind(record.action_type.as_str())
        .bind(&record.task_ids)
        .bind(record.success)
        .bind(&record.message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_actions(&self, job_id: Uuid) -> TaskerResult<Vec<UserActionRecord>> {
        let rows = sqlx::query_as::<_, UserActionRow>(
            "SELECT * FROM coursegen_user_actions WHERE job_id = $1 ORDER BY created_at",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserActionRecord::try_from).collect()
    }

    async fn save_analytics(&self, record: &AnalyticsRecord) -> TaskerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO coursegen_analytics_records (
                job_id, total_task_time_secs, wall_clock_secs, average_task_duration_secs,
                total_tasks, completed_tasks, failed_tasks, skipped_tasks, success_rate,
                total_retries, external_calls, tokens_used, estimated_cost, samples, computed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (job_id) DO UPDATE SET
                total_task_time_secs = EXCLUDED.total_task_time_secs,
                wall_clock_secs = EXCLUDED.wall_clock_secs,
                average_task_duration_secs = EXCLUDED.average_task_duration_secs,
                total_tasks = EXCLUDED.total_tasks,
                completed_tasks = EXCLUDED.completed_tasks,
                failed_tasks = EXCLUDED.failed_tasks,
                skipped_tasks = EXCLUDED.skipped_tasks,
                success_rate = EXCLUDED.success_rate,
                total_retries = EXCLUDED.total_retries,
                external_calls = EXCLUDED.external_calls,
                tokens_used = EXCLUDED.tokens_used,
                estimated_cost = EXCLUDED.estimated_cost,
                samples = EXCLUDED.samples,
                computed_at = EXCLUDED.computed_at
            "#,
        )
        .bind(record.job_id)
        .bind(record.total_task_time_secs)
        .bind(record.wall_clock_secs)
        .bind(record.average_task_duration_secs)
        .bind(record.total_tasks)
        .bind(record.completed_tasks)
        .bind(record.failed_tasks)
        .bind(record.skipped_tasks)
        .bind(record.success_rate)
        .bind(record.total_retries)
        .bind(record.usage.external_calls)
        .bind(record.usage.tokens_used)
        .bind(record.usage.estimated_cost)
        .bind(serde_json::to_value(&record.samples)?)
        .bind(record.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_analytics(&self, job_id: Uuid) -> TaskerResult<Option<AnalyticsRecord>> {
        let row = sqlx::query_as::<_, AnalyticsRow>(
            "SELECT * FROM coursegen_analytics_records WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AnalyticsRecord::try_from).transpose()
    }
}

#[async_trait]
impl WorkQueue for PgStore {
    async fn enqueue(&self, entry: NewQueueEntry) -> TaskerResult<QueueEntry> {
        // The pending row we collided with can be claimed before we read it back
        for _ in 0..ENQUEUE_ATTEMPTS {
            let inserted = sqlx::query_as::<_, QueueEntryRow>(
                r#"
                INSERT INTO coursegen_queue_entries (
                    entry_id, job_id, task_id, priority, scheduled_for, status, retry_count,
                    created_at
                )
                VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6)
                ON CONFLICT (task_id) WHERE status = 'pending' DO NOTHING
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(entry.job_id)
            .bind(entry.task_id)
            .bind(entry.priority)
            .bind(entry.scheduled_for)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = inserted {
                return row.try_into();
            }

            let existing = sqlx::query_as::<_, QueueEntryRow>(
                r#"
                SELECT * FROM coursegen_queue_entries
                WHERE task_id = $1 AND status = 'pending'
                LIMIT 1
                "#,
            )
            .bind(entry.task_id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = existing {
                return row.try_into();
            }
        }
        Err(TaskerError::DatabaseError(format!(
            "enqueue for task {:?} kept colliding with concurrent claims",
            entry.task_id
        )))
    }

    async fn get_entry(&self, entry_id: Uuid) -> TaskerResult<QueueEntry> {
        let row = sqlx::query_as::<_, QueueEntryRow>(
            "SELECT * FROM coursegen_queue_entries WHERE entry_id = $1",
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(TaskerError::QueueEntryNotFound(entry_id))?
            .try_into()
    }

    #[instrument(skip(self))]
    async fn claim_at(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> TaskerResult<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, QueueEntryRow>(
            r#"
            UPDATE coursegen_queue_entries
            SET status = 'processing', claimed_by = $1, claimed_at = $2
            WHERE entry_id = (
                SELECT entry_id FROM coursegen_queue_entries
                WHERE status = 'pending' AND scheduled_for <= $2
                ORDER BY priority DESC, scheduled_for ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to claim queue entry: {}", e);
            TaskerError::DatabaseError(format!("Queue claim failed: {e}"))
        })?;
        row.map(QueueEntry::try_from).transpose()
    }

    async fn release(&self, entry_id: Uuid) -> TaskerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE coursegen_queue_entries AS e
            SET status = CASE WHEN EXISTS (
                    SELECT 1 FROM coursegen_queue_entries AS sibling
                    WHERE sibling.task_id = e.task_id AND sibling.status = 'pending'
                ) THEN 'completed' ELSE 'pending' END,
                claimed_by = NULL, claimed_at = NULL, retry_count = e.retry_count + 1
            WHERE e.entry_id = $1 AND e.status = 'processing'
            "#,
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            // Not processing any more; only a missing row is an error
            self.get_entry(entry_id).await?;
        }
        Ok(())
    }

    async fn defer(&self, entry_id: Uuid, scheduled_for: DateTime<Utc>) -> TaskerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE coursegen_queue_entries AS e
            SET status = CASE WHEN EXISTS (
                    SELECT 1 FROM coursegen_queue_entries AS sibling
                    WHERE sibling.task_id = e.task_id AND sibling.status = 'pending'
                ) THEN 'completed' ELSE 'pending' END,
                claimed_by = NULL, claimed_at = NULL, scheduled_for = $2
            WHERE e.entry_id = $1 AND e.status = 'processing'
            "#,
        )
        .bind(entry_id)
        .bind(scheduled_for)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            self.get_entry(entry_id).await?;
        }
        Ok(())
    }

    async fn complete(&self, entry_id: Uuid) -> TaskerResult<()> {
        let result = sqlx::query(
            "UPDATE coursegen_queue_entries SET status = 'completed' WHERE entry_id = $1",
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(TaskerError::QueueEntryNotFound(entry_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reclaim_stale_at(
        &self,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> TaskerResult<Vec<QueueEntry>> {
        let cutoff = now
            .checked_sub_signed(lease_to_chrono(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let rows = sqlx::query_as::<_, QueueEntryRow>(
            r#"
            UPDATE coursegen_queue_entries AS e
            SET status = CASE WHEN EXISTS (
                    SELECT 1 FROM coursegen_queue_entries AS sibling
                    WHERE sibling.task_id = e.task_id AND sibling.status = 'pending'
                ) THEN 'completed' ELSE 'pending' END,
                claimed_by = NULL, claimed_at = NULL, retry_count = e.retry_count + 1
            WHERE e.status = 'processing' AND e.claimed_at < $1
            RETURNING *
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    async fn cancel_for_job(&self, job_id: Uuid) -> TaskerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE coursegen_queue_entries
            SET status = 'completed'
            WHERE job_id = $1 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn depth(&self) -> TaskerResult<i64> {
        let (depth,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM coursegen_queue_entries WHERE status = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(depth)
    }
}
