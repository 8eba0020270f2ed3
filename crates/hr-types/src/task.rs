//! Persisted background task and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Retrying,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Retrying => "RETRYING",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Only PENDING and RETRYING tasks may be picked up by a dispatcher.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retrying)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "PROCESSING" => Ok(TaskStatus::Processing),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "RETRYING" => Ok(TaskStatus::Retrying),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// A durably persisted, asynchronously executed unit of work with bounded retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Stored as a plain string so rows written by other versions still load.
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub retries: u32,
    pub max_retries: u32,
    pub organization_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time a RETRYING task is picked up by the sweep.
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    /// Set while PROCESSING; past this instant the attempt may be reclaimed.
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        task_type: impl Into<String>,
        payload: serde_json::Value,
        organization_id: i64,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            status: TaskStatus::Pending,
            payload,
            result: None,
            error: None,
            retries: 0,
            max_retries,
            organization_id,
            created_at: now,
            updated_at: now,
            not_before: None,
            lease_expires_at: None,
        }
    }

    pub fn mark_processing(&mut self, now: DateTime<Utc>, lease_until: DateTime<Utc>) {
        self.status = TaskStatus::Processing;
        self.lease_expires_at = Some(lease_until);
        self.not_before = None;
        self.updated_at = now;
    }

    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.lease_expires_at = None;
        self.updated_at = now;
    }

    /// Record a failed attempt: increments `retries`, then RETRYING (eligible again at
    /// `retry_at`) while `retries < max_retries`, FAILED otherwise. Returns the new status.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
        retry_at: DateTime<Utc>,
    ) -> TaskStatus {
        self.error = Some(error.into());
        self.retries += 1;
        self.lease_expires_at = None;
        self.updated_at = now;
        if self.retries < self.max_retries {
            self.status = TaskStatus::Retrying;
            self.not_before = Some(retry_at);
        } else {
            self.status = TaskStatus::Failed;
            self.not_before = None;
        }
        self.status
    }

    /// Terminal failure that can never succeed on retry; `retries` is left untouched.
    pub fn fail_permanently(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.lease_expires_at = None;
        self.not_before = None;
        self.updated_at = now;
    }
}

/// Listing filter for operator views.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub organization_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn failures_retry_until_budget_is_spent() {
        let mut t = Task::new("resume_analysis", serde_json::json!({}), 1, 3);
        let now = Utc::now();
        assert_eq!(t.record_failure("boom", now, now), TaskStatus::Retrying);
        assert_eq!(t.record_failure("boom", now, now), TaskStatus::Retrying);
        assert_eq!(t.record_failure("boom", now, now), TaskStatus::Failed);
        assert_eq!(t.retries, 3);
        assert!(t.status.is_terminal());
        assert!(t.not_before.is_none());
    }

    #[test]
    fn retrying_task_carries_not_before() {
        let mut t = Task::new("resume_analysis", serde_json::json!({}), 1, 3);
        let now = Utc::now();
        let at = now + Duration::seconds(5);
        t.mark_processing(now, now + Duration::minutes(5));
        t.record_failure("boom", now, at);
        assert_eq!(t.not_before, Some(at));
        assert!(t.lease_expires_at.is_none());
        assert!(t.status.is_dispatchable());
    }

    #[test]
    fn permanent_failure_keeps_retries() {
        let mut t = Task::new("bogus", serde_json::json!({}), 1, 3);
        t.fail_permanently("No handler for type bogus", Utc::now());
        assert_eq!(t.retries, 0);
        assert_eq!(t.status, TaskStatus::Failed);
    }

    #[test]
    fn status_wire_format_is_uppercase() {
        let v = serde_json::to_value(TaskStatus::Retrying).unwrap();
        assert_eq!(v, "RETRYING");
        assert_eq!("FAILED".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_serializes_type_field() {
        let t = Task::new("burnout_assessment", serde_json::json!({"employee_id": 4}), 9, 3);
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["type"], "burnout_assessment");
        assert_eq!(v["status"], "PENDING");
    }
}
