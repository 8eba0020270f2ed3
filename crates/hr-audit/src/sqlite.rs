//! SQLite-backed audit and governance store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hr_types::{
    format_timestamp, AuditEntry, AuditQuery, AuditStore, AuditStoreError, GovernanceLogEntry,
    GovernanceStore, GovernanceStoreError,
};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_logs (
    id TEXT PRIMARY KEY,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id INTEGER,
    actor_id INTEGER,
    actor_role TEXT NOT NULL,
    organization_id INTEGER NOT NULL,
    details TEXT NOT NULL,
    ai_recommended INTEGER NOT NULL DEFAULT 0,
    before_state TEXT,
    after_state TEXT,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_org_ts ON audit_logs(organization_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_logs(entity_type);
CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_logs(action);

CREATE TABLE IF NOT EXISTS ethical_audit_logs (
    id TEXT PRIMARY KEY,
    organization_id INTEGER,
    domain TEXT NOT NULL,
    request_id TEXT,
    model_name TEXT NOT NULL,
    input_summary TEXT NOT NULL,
    output_summary TEXT NOT NULL,
    confidence_score REAL NOT NULL,
    bias_score REAL NOT NULL,
    flagged_for_review INTEGER NOT NULL DEFAULT 0,
    checks TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ethical_ts ON ethical_audit_logs(timestamp);
"#;

const AUDIT_COLUMNS: &str = "id, action, entity_type, entity_id, actor_id, actor_role, organization_id, details, ai_recommended, before_state, after_state, timestamp";

/// SQLite-backed store. Audit rows are only ever inserted; the purge is the one delete path.
pub struct SqliteAuditStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteAuditStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditStoreError> {
        let conn =
            rusqlite::Connection::open(path).map_err(|e| AuditStoreError::Other(e.to_string()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AuditStoreError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| AuditStoreError::Other(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, AuditStoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| AuditStoreError::Other(e.to_string()))?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| format!("failed to acquire lock: {}", e))?;
        f(&conn).map_err(|e| e.to_string())
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_json(s: &str) -> Result<serde_json::Value, rusqlite::Error> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<AuditEntry, rusqlite::Error> {
    let details: String = row.get(7)?;
    let before: Option<String> = row.get(9)?;
    let after: Option<String> = row.get(10)?;
    let ts: String = row.get(11)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        action: row.get(1)?,
        entity_type: row.get(2)?,
        entity_id: row.get(3)?,
        actor_id: row.get(4)?,
        actor_role: row.get(5)?,
        organization_id: row.get(6)?,
        details: parse_json(&details)?,
        ai_recommended: row.get::<_, i64>(8)? != 0,
        before_state: before.as_deref().map(parse_json).transpose()?,
        after_state: after.as_deref().map(parse_json).transpose()?,
        timestamp: parse_ts(&ts)?,
    })
}

fn row_to_governance(row: &rusqlite::Row<'_>) -> Result<GovernanceLogEntry, rusqlite::Error> {
    let input: String = row.get(5)?;
    let output: String = row.get(6)?;
    let checks: String = row.get(10)?;
    let ts: String = row.get(11)?;
    Ok(GovernanceLogEntry {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        domain: row.get(2)?,
        request_id: row.get(3)?,
        model_name: row.get(4)?,
        input_summary: parse_json(&input)?,
        output_summary: parse_json(&output)?,
        confidence_score: row.get(7)?,
        bias_score: row.get(8)?,
        flagged_for_review: row.get::<_, i64>(9)? != 0,
        checks: parse_json(&checks)?,
        timestamp: parse_ts(&ts)?,
    })
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditStoreError> {
        let details = serde_json::to_string(&entry.details)?;
        let before = entry
            .before_state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let after = entry
            .after_state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let ts = format_timestamp(&entry.timestamp);
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO audit_logs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    AUDIT_COLUMNS
                ),
                rusqlite::params![
                    entry.id,
                    entry.action,
                    entry.entity_type,
                    entry.entity_id,
                    entry.actor_id,
                    entry.actor_role,
                    entry.organization_id,
                    details,
                    entry.ai_recommended as i64,
                    before,
                    after,
                    ts,
                ],
            )
        })
        .map_err(AuditStoreError::Other)?;
        Ok(())
    }

    async fn list(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditStoreError> {
        let mut sql = format!(
            "SELECT {} FROM audit_logs WHERE organization_id = ?",
            AUDIT_COLUMNS
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(query.organization_id)];
        if let Some(ref t) = query.entity_type {
            sql.push_str(" AND entity_type = ?");
            params.push(Box::new(t.clone()));
        }
        if let Some(ref a) = query.action {
            sql.push_str(" AND action = ?");
            params.push(Box::new(a.clone()));
        }
        if let Some(actor) = query.actor_id {
            sql.push_str(" AND actor_id = ?");
            params.push(Box::new(actor));
        }
        if let Some(since) = query.since {
            sql.push_str(" AND timestamp >= ?");
            params.push(Box::new(format_timestamp(&since)));
        }
        if let Some(until) = query.until {
            sql.push_str(" AND timestamp < ?");
            params.push(Box::new(format_timestamp(&until)));
        }
        sql.push_str(" ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?");
        params.push(Box::new(query.effective_limit() as i64));
        params.push(Box::new(query.effective_offset() as i64));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt.query_map(refs.as_slice(), row_to_entry)?;
            rows.collect()
        })
        .map_err(AuditStoreError::Other)
    }

    async fn get(
        &self,
        organization_id: i64,
        id: &str,
    ) -> Result<Option<AuditEntry>, AuditStoreError> {
        let sql = format!(
            "SELECT {} FROM audit_logs WHERE id = ?1 AND organization_id = ?2",
            AUDIT_COLUMNS
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            match stmt.query_row(rusqlite::params![id, organization_id], row_to_entry) {
                Ok(e) => Ok(Some(e)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .map_err(AuditStoreError::Other)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditStoreError> {
        let cutoff = format_timestamp(&cutoff);
        self.with_conn(|conn| {
            conn.execute("DELETE FROM audit_logs WHERE timestamp < ?1", [&cutoff])
        })
        .map(|n| n as u64)
        .map_err(AuditStoreError::Other)
    }
}

#[async_trait]
impl GovernanceStore for SqliteAuditStore {
    async fn append_governance(
        &self,
        entry: GovernanceLogEntry,
    ) -> Result<(), GovernanceStoreError> {
        let input = serde_json::to_string(&entry.input_summary)?;
        let output = serde_json::to_string(&entry.output_summary)?;
        let checks = serde_json::to_string(&entry.checks)?;
        let ts = format_timestamp(&entry.timestamp);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ethical_audit_logs (id, organization_id, domain, request_id, model_name, input_summary, output_summary, confidence_score, bias_score, flagged_for_review, checks, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    entry.id,
                    entry.organization_id,
                    entry.domain,
                    entry.request_id,
                    entry.model_name,
                    input,
                    output,
                    entry.confidence_score,
                    entry.bias_score,
                    entry.flagged_for_review as i64,
                    checks,
                    ts,
                ],
            )
        })
        .map_err(GovernanceStoreError::Other)?;
        Ok(())
    }

    async fn list_governance(
        &self,
        organization_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<GovernanceLogEntry>, GovernanceStoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, organization_id, domain, request_id, model_name, input_summary, output_summary, confidence_score, bias_score, flagged_for_review, checks, timestamp \
                 FROM ethical_audit_logs WHERE (?1 IS NULL OR organization_id = ?1) ORDER BY timestamp DESC, rowid DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![organization_id, limit as i64],
                row_to_governance,
            )?;
            rows.collect()
        })
        .map_err(GovernanceStoreError::Other)
    }

    async fn purge_governance_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, GovernanceStoreError> {
        let cutoff = format_timestamp(&cutoff);
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM ethical_audit_logs WHERE timestamp < ?1",
                [&cutoff],
            )
        })
        .map(|n| n as u64)
        .map_err(GovernanceStoreError::Other)
    }
}
