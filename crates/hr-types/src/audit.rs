//! Audit ledger records, governance telemetry and the audit query surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable audit ledger entry. Written once, never updated; only the explicit
/// retention purge removes entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub action: String,
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: Option<i64>,
    #[serde(default)]
    pub actor_id: Option<i64>,
    pub actor_role: String,
    pub organization_id: i64,
    /// Sanitized plain JSON (maps, lists, scalars only).
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub ai_recommended: bool,
    #[serde(default)]
    pub before_state: Option<serde_json::Value>,
    #[serde(default)]
    pub after_state: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Filter and pagination for listing audit entries. `organization_id` is mandatory;
/// results are newest-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub organization_id: i64,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub actor_id: Option<i64>,
    /// Inclusive lower bound.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: u32 = 100;
    pub const MAX_LIMIT: u32 = 1000;

    pub fn for_organization(organization_id: i64) -> Self {
        Self {
            organization_id,
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .min(Self::MAX_LIMIT) as usize
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0) as usize
    }

    /// True when `entry` passes every filter (pagination excluded).
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if entry.organization_id != self.organization_id {
            return false;
        }
        if let Some(ref t) = self.entity_type {
            if &entry.entity_type != t {
                return false;
            }
        }
        if let Some(ref a) = self.action {
            if &entry.action != a {
                return false;
            }
        }
        if let Some(actor) = self.actor_id {
            if entry.actor_id != Some(actor) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp >= until {
                return false;
            }
        }
        true
    }
}

/// Best-effort ethical/bias telemetry for a successful AI call. Distinct from the audit ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceLogEntry {
    pub id: String,
    #[serde(default)]
    pub organization_id: Option<i64>,
    pub domain: String,
    #[serde(default)]
    pub request_id: Option<String>,
    pub model_name: String,
    pub input_summary: serde_json::Value,
    pub output_summary: serde_json::Value,
    pub confidence_score: f64,
    pub bias_score: f64,
    pub flagged_for_review: bool,
    #[serde(default)]
    pub checks: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a retention purge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub audit_logs_purged: u64,
    pub governance_logs_purged: u64,
    pub cutoff: DateTime<Utc>,
}
