//! In-memory task store: tasks in a map behind an async RwLock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hr_types::{Task, TaskFilter, TaskStatus, TaskStore, TaskStoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn oldest_first(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), TaskStoreError> {
        let mut guard = self.tasks.write().await;
        if guard.contains_key(&task.id) {
            return Err(TaskStoreError::Other(format!("duplicate task id {}", task.id)));
        }
        guard.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, TaskStoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn release(&self, task: &Task, held: DateTime<Utc>) -> Result<bool, TaskStoreError> {
        let mut guard = self.tasks.write().await;
        match guard.get_mut(&task.id) {
            Some(slot)
                if slot.status == TaskStatus::Processing
                    && slot.lease_expires_at == Some(held) =>
            {
                *slot = task.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(TaskStoreError::NotFound(task.id.clone())),
        }
    }

    async fn claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Task>, TaskStoreError> {
        let mut guard = self.tasks.write().await;
        match guard.get_mut(id) {
            Some(task) if task.status.is_dispatchable() => {
                task.mark_processing(now, lease_until);
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskStoreError> {
        let guard = self.tasks.read().await;
        let mut out: Vec<Task> = guard
            .values()
            .filter(|t| filter.organization_id.map_or(true, |o| t.organization_id == o))
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        // newest first for operator views
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        out.truncate(filter.limit.map_or(DEFAULT_LIST_LIMIT, |l| l as usize));
        Ok(out)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, TaskStoreError> {
        let guard = self.tasks.read().await;
        let mut out: Vec<Task> = guard
            .values()
            .filter(|t| match t.status {
                TaskStatus::Pending => true,
                TaskStatus::Retrying => t.not_before.map_or(true, |nb| nb <= now),
                _ => false,
            })
            .cloned()
            .collect();
        oldest_first(&mut out);
        out.truncate(limit);
        Ok(out)
    }

    async fn list_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Task>, TaskStoreError> {
        let guard = self.tasks.read().await;
        let mut out: Vec<Task> = guard
            .values()
            .filter(|t| {
                t.status == TaskStatus::Processing
                    && t.lease_expires_at.map_or(false, |l| l < now)
            })
            .cloned()
            .collect();
        oldest_first(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("resume_analysis", json!({}), 1, 3);
        store.insert(&task).await.unwrap();
        let now = Utc::now();
        let lease = now + Duration::minutes(5);
        let first = store.claim(&task.id, now, lease).await.unwrap();
        assert_eq!(first.unwrap().status, TaskStatus::Processing);
        assert!(store.claim(&task.id, now, lease).await.unwrap().is_none());
        assert!(store.claim("missing", now, lease).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn due_respects_not_before() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let pending = Task::new("resume_analysis", json!({}), 1, 3);
        let mut later = Task::new("resume_analysis", json!({}), 1, 3);
        later.record_failure("boom", now, now + Duration::seconds(60));
        let mut ready = Task::new("resume_analysis", json!({}), 1, 3);
        ready.record_failure("boom", now, now - Duration::seconds(1));
        for t in [&pending, &later, &ready] {
            store.insert(t).await.unwrap();
        }
        let due: Vec<String> = store
            .list_due(now, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(due.len(), 2);
        assert!(due.contains(&pending.id));
        assert!(due.contains(&ready.id));
    }

    #[tokio::test]
    async fn expired_leases_are_listed() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let task = Task::new("resume_analysis", json!({}), 1, 3);
        store.insert(&task).await.unwrap();
        store
            .claim(&task.id, now - Duration::minutes(10), now - Duration::minutes(5))
            .await
            .unwrap();
        let expired = store.list_expired_leases(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, task.id);
    }

    #[tokio::test]
    async fn list_filters_by_org_and_status() {
        let store = InMemoryTaskStore::new();
        store.insert(&Task::new("resume_analysis", json!({}), 1, 3)).await.unwrap();
        store.insert(&Task::new("resume_analysis", json!({}), 2, 3)).await.unwrap();
        let mut failed = Task::new("resume_analysis", json!({}), 1, 3);
        failed.fail_permanently("nope", Utc::now());
        store.insert(&failed).await.unwrap();

        let org1 = store
            .list(&TaskFilter {
                organization_id: Some(1),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(org1.len(), 2);
        let failed_only = store
            .list(&TaskFilter {
                organization_id: Some(1),
                status: Some(TaskStatus::Failed),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(failed_only.len(), 1);
    }

    #[tokio::test]
    async fn release_unknown_task_is_not_found() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("resume_analysis", json!({}), 1, 3);
        assert!(matches!(
            store.release(&task, Utc::now()).await,
            Err(TaskStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn release_requires_the_held_lease() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("resume_analysis", json!({}), 1, 3);
        store.insert(&task).await.unwrap();
        let now = Utc::now();
        let first_lease = now - Duration::minutes(1);
        let first = store
            .claim(&task.id, now - Duration::minutes(6), first_lease)
            .await
            .unwrap()
            .unwrap();

        // the expired attempt is reclaimed and claimed again under a new lease
        let mut reclaimed = first.clone();
        reclaimed.record_failure("lease expired", now, now);
        assert!(store.release(&reclaimed, first_lease).await.unwrap());
        let second_lease = now + Duration::minutes(5);
        store.claim(&task.id, now, second_lease).await.unwrap().unwrap();

        // the first attempt finishing late cannot overwrite the second
        let mut late = first;
        late.complete(json!({"stale": true}), now);
        assert!(!store.release(&late, first_lease).await.unwrap());
        let current = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(current.status, TaskStatus::Processing);
        assert_eq!(current.lease_expires_at, Some(second_lease));
        assert!(current.result.is_none());

        let mut done = current.clone();
        done.complete(json!({"ok": true}), now);
        assert!(store.release(&done, second_lease).await.unwrap());
        // a completed task is never reopened by a stale writer
        assert!(!store.release(&reclaimed, second_lease).await.unwrap());
        let current = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(current.status, TaskStatus::Completed);
    }
}
