//! # Structured Logging Module
//!
//! Environment-aware `tracing` setup plus the canonical structured records the
//! orchestrator emits for job, task and alert events. External consumers (log
//! shippers, alert routers) key on the message tags.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// `RUST_LOG` wins when set. `COURSEGEN_LOG_FORMAT=json` switches to JSON lines.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var("COURSEGEN_LOG_FORMAT").is_ok_and(|format| format == "json");

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Embedding applications may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("COURSEGEN_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for job operations
pub fn log_job_operation(operation: &str, job_id: Uuid, status: &str, details: Option<&str>) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 JOB_OPERATION"
    );
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    job_id: Uuid,
    task_id: Uuid,
    task_identifier: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        task_id = %task_id,
        task_identifier = %task_identifier,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 TASK_OPERATION"
    );
}

/// Log a health alert; critical alerts go out at `error`
pub fn log_alert(alert_type: &str, severity: &str, job_id: Uuid, message: &str) {
    if severity == "critical" {
        tracing::error!(
            alert_type = %alert_type,
            severity = %severity,
            job_id = %job_id,
            message = %message,
            timestamp = %Utc::now().to_rfc3339(),
            "🚨 HEALTH_ALERT"
        );
    } else {
        tracing::warn!(
            alert_type = %alert_type,
            severity = %severity,
            job_id = %job_id,
            message = %message,
            timestamp = %Utc::now().to_rfc3339(),
            "⚠️ HEALTH_ALERT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_alert("stalled_tasks", "warning", Uuid::new_v4(), "test alert");
    }
}
