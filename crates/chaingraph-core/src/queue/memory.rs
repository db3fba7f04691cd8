//! In-memory [`TaskQueue`] for tests and single-process local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::store::{ClaimedTask, StoreError, TaskDefinition, TaskOutcome, TaskQueue, TaskStatus};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

struct Entry {
    definition: TaskDefinition,
    status: TaskStatus,
    attempt: u32,
    max_attempts: u32,
    claimed_by: Option<String>,
    heartbeat_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

#[derive(Default)]
pub struct InMemoryTaskQueue {
    entries: Arc<Mutex<HashMap<Uuid, Entry>>>,
    by_execution: Arc<Mutex<HashMap<Uuid, Uuid>>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: TaskDefinition) -> Result<Uuid, StoreError> {
        let mut by_execution = self.by_execution.lock();
        if let Some(existing) = by_execution.get(&task.execution_id) {
            return Ok(*existing);
        }
        let task_id = Uuid::now_v7();
        self.entries.lock().insert(
            task_id,
            Entry {
                definition: task.clone(),
                status: TaskStatus::Pending,
                attempt: 0,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                claimed_by: None,
                heartbeat_at: None,
                last_error: None,
            },
        );
        by_execution.insert(task.execution_id, task_id);
        Ok(task_id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        app_version: &str,
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        let mut entries = self.entries.lock();
        let mut ready: Vec<Uuid> = entries
            .iter()
            .filter(|(_, e)| e.status == TaskStatus::Pending && e.definition.app_version == app_version)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_by_key(|id| entries[id].definition.priority);
        ready.reverse();
        ready.truncate(max_tasks);

        let mut claimed = Vec::with_capacity(ready.len());
        for id in ready {
            let entry = entries.get_mut(&id).expect("entry exists");
            entry.status = TaskStatus::Claimed;
            entry.attempt += 1;
            entry.claimed_by = Some(worker_id.to_string());
            entry.heartbeat_at = Some(Utc::now());
            claimed.push(ClaimedTask {
                id,
                definition: entry.definition.clone(),
                attempt: entry.attempt,
                max_attempts: entry.max_attempts,
            });
        }
        Ok(claimed)
    }

    async fn heartbeat(&self, task_id: Uuid, worker_id: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&task_id) else { return Ok(false) };
        if entry.status != TaskStatus::Claimed || entry.claimed_by.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        entry.heartbeat_at = Some(Utc::now());
        Ok(true)
    }

    async fn complete(&self, task_id: Uuid, _result: serde_json::Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
        entry.status = TaskStatus::Completed;
        Ok(())
    }

    async fn fail(&self, task_id: Uuid, error: String) -> Result<TaskOutcome, StoreError> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
        entry.last_error = Some(error);
        if entry.attempt >= entry.max_attempts {
            entry.status = TaskStatus::Dead;
            Ok(TaskOutcome::ExhaustedRetries)
        } else {
            entry.status = TaskStatus::Pending;
            entry.claimed_by = None;
            Ok(TaskOutcome::WillRetry { next_attempt: entry.attempt + 1 })
        }
    }

    async fn reclaim_stale(&self, stale_after_secs: i64) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock();
        let cutoff = Utc::now() - chrono::Duration::seconds(stale_after_secs);
        let mut reclaimed = 0;
        for entry in entries.values_mut() {
            if entry.status == TaskStatus::Claimed && entry.heartbeat_at.map(|h| h < cutoff).unwrap_or(false) {
                entry.status = TaskStatus::Pending;
                entry.claimed_by = None;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn status(&self, task_id: Uuid) -> Result<TaskStatus, StoreError> {
        self.entries
            .lock()
            .get(&task_id)
            .map(|e| e.status)
            .ok_or(StoreError::TaskNotFound(task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(execution_id: Uuid) -> TaskDefinition {
        TaskDefinition {
            execution_id,
            flow_id: Uuid::now_v7(),
            root_execution_id: execution_id,
            parent_execution_id: None,
            depth: 0,
            input: serde_json::json!({}),
            priority: 0,
            app_version: "dev".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_enqueue_for_the_same_execution_is_idempotent() {
        let queue = InMemoryTaskQueue::new();
        let execution_id = Uuid::now_v7();
        let first = queue.enqueue(task(execution_id)).await.unwrap();
        let second = queue.enqueue(task(execution_id)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn claim_is_exclusive_between_two_claimants() {
        let queue = InMemoryTaskQueue::new();
        queue.enqueue(task(Uuid::now_v7())).await.unwrap();

        let first = queue.claim("worker-a", "dev", 10).await.unwrap();
        let second = queue.claim("worker-b", "dev", 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0);
    }

    #[tokio::test]
    async fn claim_only_returns_tasks_matching_the_worker_app_version() {
        let queue = InMemoryTaskQueue::new();
        let mut old_task = task(Uuid::now_v7());
        old_task.app_version = "v1".to_string();
        queue.enqueue(old_task).await.unwrap();

        let claimed = queue.claim("worker-a", "v2", 10).await.unwrap();
        assert!(claimed.is_empty(), "a task enqueued under v1 must not be claimed by a v2 worker");

        let claimed = queue.claim("worker-a", "v1", 10).await.unwrap();
        assert_eq!(claimed.len(), 1, "the matching version still claims it");
    }

    #[tokio::test]
    async fn exhausting_retries_moves_task_to_dead() {
        let queue = InMemoryTaskQueue::new();
        let claimed_id = queue.enqueue(task(Uuid::now_v7())).await.unwrap();

        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            queue.claim("worker-a", "dev", 10).await.unwrap();
            let outcome = queue.fail(claimed_id, "boom".to_string()).await.unwrap();
            if matches!(outcome, TaskOutcome::ExhaustedRetries) {
                break;
            }
        }

        assert_eq!(queue.status(claimed_id).await.unwrap(), TaskStatus::Dead);
    }
}
