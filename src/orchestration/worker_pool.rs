//! # Worker Pool
//!
//! Independent tokio workers, each looping claim → execute → complete. A
//! worker that finds the queue empty sleeps for the poll interval and wakes
//! early on shutdown. Workers share nothing but the store handles and the
//! executor (and through it the per-process breaker registry).
//!
//! An entry is completed once the executor reached an outcome for it, except a
//! deferral, which puts the same entry back to `pending` for the breaker's
//! cool-down without counting an attempt. It is released back to the queue
//! only when the executor hit a storage fault. A worker that dies mid-entry leaves a claim behind that
//! the health sweep reclaims after the lease.

use crate::config::WorkerConfig;
use crate::database::WorkQueue;
use crate::error::{TaskerError, TaskerResult};
use crate::orchestration::task_executor::{ExecutionOutcome, TaskExecutor};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Back-off after a storage fault before the worker polls again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct WorkerPool {
    queue: Arc<dyn WorkQueue>,
    executor: TaskExecutor,
    config: WorkerConfig,
    poll_interval: Duration,
    running: AtomicBool,
    shutdown_notify: Notify,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("poll_interval", &self.poll_interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        executor: TaskExecutor,
        config: WorkerConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            executor,
            config,
            poll_interval,
            running: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Worker ids this pool runs under
    pub fn worker_ids(&self) -> Vec<String> {
        (1..=self.config.count)
            .map(|n| format!("{}-{n}", self.config.id_prefix))
            .collect()
    }

    /// Claim and process at most one entry as `worker_id`
    ///
    /// Returns `Ok(None)` when nothing was claimable.
    pub async fn run_once(&self, worker_id: &str) -> TaskerResult<Option<ExecutionOutcome>> {
        let Some(entry) = self.queue.claim(worker_id).await? else {
            return Ok(None);
        };

        match self.executor.execute(&entry).await {
            Ok(outcome) => {
                match &outcome {
                    ExecutionOutcome::Deferred { run_at, .. } => {
                        self.queue.defer(entry.entry_id, *run_at).await?
                    }
                    _ => self.queue.complete(entry.entry_id).await?,
                }
                debug!(
                    worker_id = %worker_id,
                    entry_id = %entry.entry_id,
                    outcome = ?outcome,
                    "Entry processed"
                );
                Ok(Some(outcome))
            }
            Err(e) => {
                warn!(
                    worker_id = %worker_id,
                    entry_id = %entry.entry_id,
                    error = %e,
                    "Execution hit a storage fault; releasing entry"
                );
                self.queue.release(entry.entry_id).await?;
                Err(e)
            }
        }
    }

    /// Process entries until none is claimable
    pub async fn run_until_idle(&self, worker_id: &str) -> TaskerResult<Vec<ExecutionOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_once(worker_id).await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Spawn the configured number of workers
    pub fn start(self: &Arc<Self>) -> TaskerResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(TaskerError::OrchestrationError(
                "worker pool is already running".to_string(),
            ));
        }

        let mut handles = self.handles.lock();
        for worker_id in self.worker_ids() {
            let pool = Arc::clone(self);
            handles.push(tokio::spawn(async move { pool.worker_loop(worker_id).await }));
        }
        info!(
            workers = handles.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Worker pool started"
        );
        Ok(())
    }

    /// Signal shutdown and wait up to `timeout` for workers to finish their current entry
    pub async fn stop(&self, timeout: Duration) -> TaskerResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown_notify.notify_waiters();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let results = tokio::time::timeout(timeout, join_all(handles))
            .await
            .map_err(|_| TaskerError::OrchestrationError("worker pool stop timed out".to_string()))?;
        for result in results {
            if let Err(e) = result {
                error!(error = %e, "Worker terminated abnormally");
            }
        }

        info!("Worker pool stopped");
        Ok(())
    }

    async fn worker_loop(&self, worker_id: String) {
        debug!(worker_id = %worker_id, "Worker started");
        while self.is_running() {
            let wait = match self.run_once(&worker_id).await {
                Ok(Some(_)) => continue,
                Ok(None) => self.poll_interval,
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "Worker iteration failed");
                    ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {},
                _ = self.shutdown_notify.notified() => {
                    debug!(worker_id = %worker_id, "Shutdown notification received");
                    break;
                }
            }
        }
        debug!(worker_id = %worker_id, "Worker stopped");
    }
}
