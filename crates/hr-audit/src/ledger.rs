//! Audit ledger service: records never fail the caller.

use crate::sanitize::{plainify, SanitizeError};
use chrono::{Duration, Utc};
use hr_types::{
    AuditEntry, AuditQuery, AuditStore, AuditStoreError, GovernanceStore, GovernanceStoreError,
    RetentionReport,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Default retention horizon for the purge.
pub const DEFAULT_RETENTION_DAYS: u32 = 365;

/// One action to record. Built with chained setters; payloads are plainified eagerly and
/// any serialization failure is carried to [`AuditLedger::record`], which logs and drops it.
#[derive(Debug)]
pub struct AuditRecord {
    action: String,
    entity_type: String,
    entity_id: Option<i64>,
    actor_id: Option<i64>,
    actor_role: String,
    organization_id: i64,
    details: Value,
    ai_recommended: bool,
    before_state: Option<Value>,
    after_state: Option<Value>,
    error: Option<SanitizeError>,
}

impl AuditRecord {
    pub fn new(
        action: impl Into<String>,
        entity_type: impl Into<String>,
        organization_id: i64,
    ) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            actor_id: None,
            actor_role: "system".to_string(),
            organization_id,
            details: json!({}),
            ai_recommended: false,
            before_state: None,
            after_state: None,
            error: None,
        }
    }

    pub fn entity(mut self, entity_id: Option<i64>) -> Self {
        self.entity_id = entity_id;
        self
    }

    pub fn actor(mut self, actor_id: Option<i64>, actor_role: impl Into<String>) -> Self {
        self.actor_id = actor_id;
        self.actor_role = actor_role.into();
        self
    }

    pub fn ai_recommended(mut self, flag: bool) -> Self {
        self.ai_recommended = flag;
        self
    }

    /// Details are always stored as a map; a non-map payload is nested under `"value"`.
    pub fn details<T: Serialize + ?Sized>(mut self, details: &T) -> Self {
        match plainify(details) {
            Ok(Value::Object(map)) => self.details = Value::Object(map),
            Ok(Value::Null) => self.details = json!({}),
            Ok(other) => self.details = json!({ "value": other }),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn before<T: Serialize + ?Sized>(mut self, state: &T) -> Self {
        match plainify(state) {
            Ok(v) => self.before_state = Some(v),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn after<T: Serialize + ?Sized>(mut self, state: &T) -> Self {
        match plainify(state) {
            Ok(v) => self.after_state = Some(v),
            Err(e) => self.error = Some(e),
        }
        self
    }

    fn into_entry(self) -> Result<AuditEntry, SanitizeError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(AuditEntry {
            id: Uuid::new_v4().to_string(),
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            actor_id: self.actor_id,
            actor_role: self.actor_role,
            organization_id: self.organization_id,
            details: self.details,
            ai_recommended: self.ai_recommended,
            before_state: self.before_state,
            after_state: self.after_state,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    #[error("retention horizon must be at least one day and within the supported date range")]
    InvalidHorizon,
    #[error(transparent)]
    Audit(#[from] AuditStoreError),
    #[error(transparent)]
    Governance(#[from] GovernanceStoreError),
}

/// Append-only ledger over an [`AuditStore`], optionally paired with a governance store
/// so the retention purge covers both.
#[derive(Clone)]
pub struct AuditLedger {
    store: Arc<dyn AuditStore>,
    governance: Option<Arc<dyn GovernanceStore>>,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            governance: None,
        }
    }

    pub fn with_governance(mut self, governance: Arc<dyn GovernanceStore>) -> Self {
        self.governance = Some(governance);
        self
    }

    /// Append one entry. Never returns an error: sanitization or storage failures are
    /// logged and `None` is returned so the triggering action proceeds regardless.
    pub async fn record(&self, record: AuditRecord) -> Option<AuditEntry> {
        let action = record.action.clone();
        let entry = match record.into_entry() {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(action = %action, error = %e, "failed to audit log: payload rejected");
                return None;
            }
        };
        match self.store.append(entry.clone()).await {
            Ok(()) => {
                tracing::debug!(
                    audit_id = %entry.id,
                    action = %entry.action,
                    organization_id = entry.organization_id,
                    "audit entry recorded"
                );
                Some(entry)
            }
            Err(e) => {
                tracing::error!(action = %action, error = %e, "failed to audit log: store rejected entry");
                None
            }
        }
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditStoreError> {
        self.store.list(query).await
    }

    pub async fn get(
        &self,
        organization_id: i64,
        id: &str,
    ) -> Result<Option<AuditEntry>, AuditStoreError> {
        self.store.get(organization_id, id).await
    }

    /// Operational/compliance event, recorded as `ops_<event_type>` on the `system` entity.
    pub async fn log_operational_event(
        &self,
        event_type: &str,
        status: &str,
        details: Value,
        organization_id: i64,
    ) -> Option<AuditEntry> {
        let mut details = match details {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut m = serde_json::Map::new();
                m.insert("value".to_string(), other);
                m
            }
        };
        details.insert("ops_status".to_string(), Value::String(status.to_string()));
        self.record(
            AuditRecord::new(format!("ops_{}", event_type), "system", organization_id)
                .actor(None, "system")
                .details(&details),
        )
        .await
    }

    /// Flag a high-risk AI decision or potential bias issue.
    pub async fn flag_ethical_issue(
        &self,
        domain: &str,
        request_id: Option<&str>,
        issue_type: &str,
        details: Value,
        organization_id: i64,
    ) -> Option<AuditEntry> {
        tracing::warn!(
            domain = %domain,
            request_id = request_id.unwrap_or(""),
            issue_type = %issue_type,
            "ethical issue flagged"
        );
        let mut merged = serde_json::Map::new();
        merged.insert("issue_type".to_string(), json!(issue_type));
        merged.insert("request_id".to_string(), json!(request_id));
        merged.insert("domain".to_string(), json!(domain));
        if let Value::Object(extra) = details {
            merged.extend(extra);
        }
        self.record(
            AuditRecord::new("ethical_violation_flagged", "ai_governance", organization_id)
                .actor(None, "ai_system")
                .details(&merged),
        )
        .await
    }

    /// Explicit, age-gated maintenance: delete audit and governance entries older than
    /// `retention_days`. Never invoked implicitly by writes.
    pub async fn purge_older_than(
        &self,
        retention_days: u32,
    ) -> Result<RetentionReport, RetentionError> {
        if retention_days == 0 {
            return Err(RetentionError::InvalidHorizon);
        }
        let cutoff = Duration::try_days(i64::from(retention_days))
            .and_then(|horizon| Utc::now().checked_sub_signed(horizon))
            .ok_or(RetentionError::InvalidHorizon)?;
        let audit_logs_purged = self.store.purge_before(cutoff).await?;
        let governance_logs_purged = match self.governance {
            Some(ref g) => g.purge_governance_before(cutoff).await?,
            None => 0,
        };
        tracing::info!(
            audit_logs_purged,
            governance_logs_purged,
            cutoff = %cutoff,
            "data retention enforced"
        );
        Ok(RetentionReport {
            audit_logs_purged,
            governance_logs_purged,
            cutoff,
        })
    }
}
