//! Storage traits for the audit ledger, governance log and task queue.

use crate::{AuditEntry, AuditQuery, GovernanceLogEntry, Task, TaskFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Append-only audit storage.
///
/// Contract: there is no update and no per-entry delete. `purge_before` is the only
/// removal path and is invoked explicitly by retention maintenance.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditStoreError>;

    /// Entries matching `query`, newest first, paginated.
    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditStoreError>;

    /// Single entry, scoped to its organization. `Ok(None)` when absent or owned by another tenant.
    async fn get(
        &self,
        organization_id: i64,
        id: &str,
    ) -> Result<Option<AuditEntry>, AuditStoreError>;

    /// Delete entries strictly older than `cutoff`; returns the number removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditStoreError>;
}

/// Governance telemetry storage. Writes are best-effort at the call site.
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    async fn append_governance(&self, entry: GovernanceLogEntry)
        -> Result<(), GovernanceStoreError>;

    async fn list_governance(
        &self,
        organization_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<GovernanceLogEntry>, GovernanceStoreError>;

    async fn purge_governance_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, GovernanceStoreError>;
}

/// Durable task storage.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<(), TaskStoreError>;

    async fn get(&self, id: &str) -> Result<Option<Task>, TaskStoreError>;

    /// Write the outcome of an attempt holding the lease `held`: overwrite the stored
    /// row with `task` only while it is still PROCESSING under that exact lease.
    /// Returns `Ok(false)` when the lease was lost to a reclaim or a newer claim, in which
    /// case nothing is written.
    async fn release(&self, task: &Task, held: DateTime<Utc>) -> Result<bool, TaskStoreError>;

    /// Atomically move a PENDING or RETRYING task to PROCESSING with a lease.
    /// Returns `Ok(None)` when the task is missing or no longer dispatchable, so at most
    /// one concurrent attempt wins.
    async fn claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Task>, TaskStoreError>;

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskStoreError>;

    /// PENDING tasks and RETRYING tasks whose `not_before` has passed, oldest first.
    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, TaskStoreError>;

    /// PROCESSING tasks whose lease expired before `now`.
    async fn list_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Task>, TaskStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditStoreError {
    #[error("audit store error: {0}")]
    Other(String),
    #[error("audit serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum GovernanceStoreError {
    #[error("governance store error: {0}")]
    Other(String),
    #[error("governance serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task store error: {0}")]
    Other(String),
    #[error("task serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("task not found: {0}")]
    NotFound(String),
}
