//! In-memory audit and governance store (process lifetime only).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hr_types::{
    AuditEntry, AuditQuery, AuditStore, AuditStoreError, GovernanceLogEntry, GovernanceStore,
    GovernanceStoreError,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory implementation of [`AuditStore`] and [`GovernanceStore`].
#[derive(Clone, Default)]
pub struct InMemoryAuditStore {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
    governance: Arc<RwLock<Vec<GovernanceLogEntry>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn newest_first_page(mut out: Vec<AuditEntry>, query: &AuditQuery) -> Vec<AuditEntry> {
    // Stable sort keeps insertion order among equal timestamps; reverse gives newest first.
    out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    out.reverse();
    out.into_iter()
        .skip(query.effective_offset())
        .take(query.effective_limit())
        .collect()
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditStoreError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditStoreError> {
        let guard = self.entries.read().await;
        let out: Vec<AuditEntry> = guard.iter().filter(|e| query.matches(e)).cloned().collect();
        Ok(newest_first_page(out, query))
    }

    async fn get(
        &self,
        organization_id: i64,
        id: &str,
    ) -> Result<Option<AuditEntry>, AuditStoreError> {
        let guard = self.entries.read().await;
        Ok(guard
            .iter()
            .find(|e| e.id == id && e.organization_id == organization_id)
            .cloned())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditStoreError> {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|e| e.timestamp >= cutoff);
        Ok((before - guard.len()) as u64)
    }
}

#[async_trait]
impl GovernanceStore for InMemoryAuditStore {
    async fn append_governance(
        &self,
        entry: GovernanceLogEntry,
    ) -> Result<(), GovernanceStoreError> {
        self.governance.write().await.push(entry);
        Ok(())
    }

    async fn list_governance(
        &self,
        organization_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<GovernanceLogEntry>, GovernanceStoreError> {
        let guard = self.governance.read().await;
        Ok(guard
            .iter()
            .rev()
            .filter(|e| organization_id.is_none() || e.organization_id == organization_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_governance_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, GovernanceStoreError> {
        let mut guard = self.governance.write().await;
        let before = guard.len();
        guard.retain(|e| e.timestamp >= cutoff);
        Ok((before - guard.len()) as u64)
    }
}
