//! SQLite-backed task store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hr_types::{format_timestamp, Task, TaskFilter, TaskStatus, TaskStore, TaskStoreError};
use rusqlite::{params, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    result TEXT,
    error TEXT,
    retries INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    organization_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    not_before TEXT,
    lease_expires_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, not_before);
CREATE INDEX IF NOT EXISTS idx_tasks_org ON tasks(organization_id, created_at);
"#;

const COLUMNS: &str = "id, type, status, payload, result, error, retries, max_retries, organization_id, created_at, updated_at, not_before, lease_expires_at";

const DEFAULT_LIST_LIMIT: u32 = 100;

pub struct SqliteTaskStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteTaskStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, TaskStoreError> {
        let conn =
            rusqlite::Connection::open(path).map_err(|e| TaskStoreError::Other(e.to_string()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, TaskStoreError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| TaskStoreError::Other(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, TaskStoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| TaskStoreError::Other(e.to_string()))?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, TaskStoreError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, rusqlite::Error>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| TaskStoreError::Other(format!("failed to acquire lock: {}", e)))?;
        f(&mut conn).map_err(|e| TaskStoreError::Other(e.to_string()))
    }
}

fn conversion_error<E>(e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(conversion_error)
}

fn parse_json(s: &str) -> Result<serde_json::Value, rusqlite::Error> {
    serde_json::from_str(s).map_err(conversion_error)
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct BadStatus(String);

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<Task, rusqlite::Error> {
    let status: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let result: Option<String> = row.get(4)?;
    let created: String = row.get(9)?;
    let updated: String = row.get(10)?;
    let not_before: Option<String> = row.get(11)?;
    let lease: Option<String> = row.get(12)?;
    Ok(Task {
        id: row.get(0)?,
        task_type: row.get(1)?,
        status: status
            .parse::<TaskStatus>()
            .map_err(|e| conversion_error(BadStatus(e)))?,
        payload: parse_json(&payload)?,
        result: result.as_deref().map(parse_json).transpose()?,
        error: row.get(5)?,
        retries: row.get(6)?,
        max_retries: row.get(7)?,
        organization_id: row.get(8)?,
        created_at: parse_ts(&created)?,
        updated_at: parse_ts(&updated)?,
        not_before: not_before.as_deref().map(parse_ts).transpose()?,
        lease_expires_at: lease.as_deref().map(parse_ts).transpose()?,
    })
}

fn opt_ts(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(format_timestamp)
}

fn get_task(conn: &rusqlite::Connection, id: &str) -> Result<Option<Task>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {} FROM tasks WHERE id = ?1", COLUMNS),
        params![id],
        row_to_task,
    )
    .optional()
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), TaskStoreError> {
        let payload = serde_json::to_string(&task.payload)?;
        let result = task.result.as_ref().map(serde_json::to_string).transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    COLUMNS
                ),
                params![
                    task.id,
                    task.task_type,
                    task.status.as_str(),
                    payload,
                    result,
                    task.error,
                    task.retries,
                    task.max_retries,
                    task.organization_id,
                    format_timestamp(&task.created_at),
                    format_timestamp(&task.updated_at),
                    opt_ts(&task.not_before),
                    opt_ts(&task.lease_expires_at),
                ],
            )
            .map(|_| ())
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, TaskStoreError> {
        self.with_conn(|conn| get_task(conn, id))
    }

    async fn release(&self, task: &Task, held: DateTime<Utc>) -> Result<bool, TaskStoreError> {
        let result = task.result.as_ref().map(serde_json::to_string).transpose()?;
        let (changed, exists) = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE tasks SET status = ?2, result = ?3, error = ?4, retries = ?5, \
                 updated_at = ?6, not_before = ?7, lease_expires_at = ?8 \
                 WHERE id = ?1 AND status = 'PROCESSING' AND lease_expires_at = ?9",
                params![
                    task.id,
                    task.status.as_str(),
                    result,
                    task.error,
                    task.retries,
                    format_timestamp(&task.updated_at),
                    opt_ts(&task.not_before),
                    opt_ts(&task.lease_expires_at),
                    format_timestamp(&held),
                ],
            )?;
            let exists = changed == 1
                || tx
                    .query_row("SELECT 1 FROM tasks WHERE id = ?1", params![task.id], |_| Ok(()))
                    .optional()?
                    .is_some();
            tx.commit()?;
            Ok((changed, exists))
        })?;
        if !exists {
            return Err(TaskStoreError::NotFound(task.id.clone()));
        }
        Ok(changed == 1)
    }

    async fn claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Task>, TaskStoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE tasks SET status = 'PROCESSING', updated_at = ?2, lease_expires_at = ?3, \
                 not_before = NULL WHERE id = ?1 AND status IN ('PENDING', 'RETRYING')",
                params![id, format_timestamp(&now), format_timestamp(&lease_until)],
            )?;
            let claimed = if changed == 1 {
                get_task(&tx, id)?
            } else {
                None
            };
            tx.commit()?;
            Ok(claimed)
        })
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskStoreError> {
        let mut sql = format!("SELECT {} FROM tasks WHERE 1 = 1", COLUMNS);
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(org) = filter.organization_id {
            values.push(Box::new(org));
            sql.push_str(&format!(" AND organization_id = ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(Box::new(status.as_str()));
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }
        values.push(Box::new(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT)));
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ?{}",
            values.len()
        ));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                row_to_task,
            )?;
            rows.collect()
        })
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, TaskStoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks WHERE status = 'PENDING' \
                 OR (status = 'RETRYING' AND (not_before IS NULL OR not_before <= ?1)) \
                 ORDER BY created_at ASC, id ASC LIMIT ?2",
                COLUMNS
            ))?;
            let rows = stmt.query_map(params![format_timestamp(&now), limit], row_to_task)?;
            rows.collect()
        })
    }

    async fn list_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Task>, TaskStoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks WHERE status = 'PROCESSING' \
                 AND lease_expires_at IS NOT NULL AND lease_expires_at < ?1 \
                 ORDER BY created_at ASC, id ASC",
                COLUMNS
            ))?;
            let rows = stmt.query_map(params![format_timestamp(&now)], row_to_task)?;
            rows.collect()
        })
    }
}
