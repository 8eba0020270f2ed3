//! Task executor: enqueue, dispatch, sweep.

use crate::kind::TaskKind;
use crate::registry::{HandlerError, HandlerRegistry};
use chrono::Utc;
use hr_types::{Task, TaskFilter, TaskStatus, TaskStore, TaskStoreError};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Store(#[from] TaskStoreError),
    #[error("task not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_retries: u32,
    /// How long a PROCESSING attempt may run before it is abandoned and reclaimable.
    pub lease: Duration,
    /// Delay before the first retry; doubles per failed attempt up to `max_retry_delay`.
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Tasks dispatched per sweep.
    pub sweep_batch: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            lease: Duration::from_secs(300),
            retry_delay: Duration::from_secs(30),
            max_retry_delay: Duration::from_secs(900),
            sweep_batch: 50,
        }
    }
}

impl ExecutorConfig {
    fn retry_delay_after(&self, retries: u32) -> chrono::Duration {
        let factor = 2u32.saturating_pow(retries.saturating_sub(1));
        let delay = self
            .retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay);
        chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0))
    }

    /// Handler budget, kept strictly inside the lease so an attempt that times out still
    /// holds its lease when it records the failure.
    fn attempt_timeout(&self) -> Duration {
        self.lease.saturating_sub(self.lease / 10)
    }

    fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease).unwrap_or_else(|_| chrono::Duration::minutes(5))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Retrying,
    Failed,
    /// Missing, already terminal, claimed by another dispatcher, or the attempt lost its
    /// lease before it could record the outcome.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub reclaimed: usize,
    pub dispatched: usize,
}

struct Inner {
    store: Arc<dyn TaskStore>,
    registry: HandlerRegistry,
    config: ExecutorConfig,
}

/// Cloneable handle; clones share the store, registry and worker queue.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<Inner>,
    tx: mpsc::UnboundedSender<String>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
}

impl TaskExecutor {
    /// Build an executor. Nothing runs in the background until [`spawn_worker`] or
    /// [`spawn_sweeper`] is called.
    ///
    /// [`spawn_worker`]: TaskExecutor::spawn_worker
    /// [`spawn_sweeper`]: TaskExecutor::spawn_sweeper
    pub fn new(store: Arc<dyn TaskStore>, registry: HandlerRegistry, config: ExecutorConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                config,
            }),
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    /// Start the worker that dispatches freshly enqueued tasks. Returns `None` if a worker
    /// is already running for this executor.
    pub fn spawn_worker(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.rx.lock().ok()?.take()?;
        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    if let Err(e) = inner.dispatch(&id).await {
                        tracing::error!(task_id = %id, error = %e, "task dispatch failed");
                    }
                });
            }
        }))
    }

    /// Run [`TaskExecutor::sweep`] every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match inner.sweep().await {
                    Ok(report) if report != SweepReport::default() => {
                        tracing::info!(
                            reclaimed = report.reclaimed,
                            dispatched = report.dispatched,
                            "task sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "task sweep failed"),
                }
            }
        })
    }

    /// Persist a PENDING task and hand it to the worker. The task is durable before this
    /// returns; if no worker is running the sweeper picks it up.
    pub async fn enqueue(
        &self,
        kind: TaskKind,
        payload: Value,
        organization_id: i64,
    ) -> Result<Task, TaskError> {
        let task = Task::new(
            kind.as_str(),
            payload,
            organization_id,
            self.inner.config.max_retries,
        );
        self.inner.store.insert(&task).await?;
        tracing::info!(task_id = %task.id, kind = %kind, organization_id, "enqueued task");
        if self.tx.send(task.id.clone()).is_err() {
            tracing::warn!(task_id = %task.id, "worker queue closed; task left for the sweeper");
        }
        Ok(task)
    }

    /// Run one attempt of the task now, regardless of `not_before`.
    pub async fn dispatch(&self, task_id: &str) -> Result<DispatchOutcome, TaskError> {
        self.inner.dispatch(task_id).await
    }

    /// Reclaim expired leases, then dispatch due tasks.
    pub async fn sweep(&self) -> Result<SweepReport, TaskError> {
        self.inner.sweep().await
    }

    /// Tenant-scoped lookup: a task owned by another organization reads as absent.
    pub async fn get(&self, organization_id: i64, task_id: &str) -> Result<Option<Task>, TaskError> {
        Ok(self
            .inner
            .store
            .get(task_id)
            .await?
            .filter(|t| t.organization_id == organization_id))
    }

    pub async fn list(
        &self,
        organization_id: i64,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, TaskError> {
        let filter = TaskFilter {
            organization_id: Some(organization_id),
            status,
            limit: None,
        };
        Ok(self.inner.store.list(&filter).await?)
    }

    pub fn is_registered(&self, kind: TaskKind) -> bool {
        self.inner.registry.is_registered(kind)
    }
}

impl Inner {
    async fn dispatch(&self, task_id: &str) -> Result<DispatchOutcome, TaskError> {
        let now = Utc::now();
        let lease_until = now + self.config.lease_duration();
        let mut task = match self.store.claim(task_id, now, lease_until).await? {
            Some(task) => task,
            None => {
                tracing::debug!(task_id, "task not dispatchable; skipping");
                return Ok(DispatchOutcome::Skipped);
            }
        };
        let held = task.lease_expires_at.unwrap_or(lease_until);

        let handler = match self.registry.resolve(&task.task_type) {
            Some(h) => h,
            None => {
                let msg = format!("No handler for type {}", task.task_type);
                tracing::error!(task_id, task_type = %task.task_type, "{}", msg);
                task.fail_permanently(msg, Utc::now());
                return self.settle(&task, held, DispatchOutcome::Failed).await;
            }
        };

        tracing::info!(task_id, task_type = %task.task_type, attempt = task.retries + 1, "processing task");
        let attempt = {
            let task = task.clone();
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.handle(&task).await })
        };
        let abort = attempt.abort_handle();
        let result = match tokio::time::timeout(self.config.attempt_timeout(), attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(HandlerError::Retryable(format!(
                "handler aborted: {}",
                join_err
            ))),
            Err(_) => {
                abort.abort();
                Err(HandlerError::Retryable(format!(
                    "handler exceeded lease of {}ms",
                    self.config.lease.as_millis()
                )))
            }
        };

        let now = Utc::now();
        let outcome = match result {
            Ok(value) => {
                task.complete(value, now);
                tracing::info!(task_id, "task completed");
                DispatchOutcome::Completed
            }
            Err(HandlerError::Permanent(e)) => {
                tracing::error!(task_id, error = %e, "task failed permanently");
                task.fail_permanently(e, now);
                DispatchOutcome::Failed
            }
            Err(HandlerError::Retryable(e)) => {
                let retry_at = now + self.config.retry_delay_after(task.retries + 1);
                match task.record_failure(e.as_str(), now, retry_at) {
                    TaskStatus::Retrying => {
                        tracing::warn!(task_id, retries = task.retries, error = %e, "task failed; will retry");
                        DispatchOutcome::Retrying
                    }
                    _ => {
                        tracing::error!(task_id, retries = task.retries, error = %e, "task failed; retries exhausted");
                        DispatchOutcome::Failed
                    }
                }
            }
        };
        self.settle(&task, held, outcome).await
    }

    /// Record the attempt's outcome if it still holds `held`; a reclaimed attempt's
    /// result is discarded.
    async fn settle(
        &self,
        task: &Task,
        held: chrono::DateTime<Utc>,
        outcome: DispatchOutcome,
    ) -> Result<DispatchOutcome, TaskError> {
        if self.store.release(task, held).await? {
            Ok(outcome)
        } else {
            tracing::warn!(task_id = %task.id, ?outcome, "lease lost before the attempt finished; outcome discarded");
            Ok(DispatchOutcome::Skipped)
        }
    }

    async fn sweep(&self) -> Result<SweepReport, TaskError> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        for mut task in self.store.list_expired_leases(now).await? {
            let Some(held) = task.lease_expires_at else {
                continue;
            };
            let retry_at = now + self.config.retry_delay_after(task.retries + 1);
            let status = task.record_failure("lease expired", now, retry_at);
            if self.store.release(&task, held).await? {
                tracing::warn!(task_id = %task.id, status = %status, "reclaimed task with expired lease");
                report.reclaimed += 1;
            } else {
                tracing::debug!(task_id = %task.id, "expired attempt settled before reclaim");
            }
        }

        for task in self.store.list_due(now, self.config.sweep_batch).await? {
            match self.dispatch(&task.id).await {
                Ok(DispatchOutcome::Skipped) => {}
                Ok(_) => report.dispatched += 1,
                Err(e) => tracing::error!(task_id = %task.id, error = %e, "sweep dispatch failed"),
            }
        }
        Ok(report)
    }
}
