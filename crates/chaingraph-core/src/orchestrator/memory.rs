//! In-memory [`ExecutionStore`] for tests and local single-process runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::store::{ExecutionRow, ExecutionStatus, ExecutionStore, NewExecution, StoreError};

#[derive(Default)]
pub struct InMemoryExecutionStore {
    rows: Arc<Mutex<HashMap<Uuid, ExecutionRow>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F: FnOnce(&mut ExecutionRow)>(&self, id: Uuid, f: F) -> Result<(), StoreError> {
        let mut rows = self.rows.lock();
        let row = rows.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
        f(row);
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, execution: NewExecution) -> Result<(), StoreError> {
        let row = ExecutionRow {
            id: execution.id,
            flow_id: execution.flow_id,
            owner_id: execution.owner_id,
            status: ExecutionStatus::Created,
            debug: execution.debug,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            root_execution_id: execution.root_execution_id,
            parent_execution_id: execution.parent_execution_id,
            execution_depth: execution.execution_depth,
            integration_context: execution.integration_context,
            event_data: execution.event_data,
        };
        self.rows.lock().insert(execution.id, row);
        Ok(())
    }

    async fn get(&self, execution_id: Uuid) -> Result<ExecutionRow, StoreError> {
        self.rows
            .lock()
            .get(&execution_id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound(execution_id))
    }

    async fn get_status(&self, execution_id: Uuid) -> Result<ExecutionStatus, StoreError> {
        Ok(self.get(execution_id).await?.status)
    }

    async fn mark_running(&self, execution_id: Uuid) -> Result<(), StoreError> {
        self.update(execution_id, |row| {
            if row.status.is_terminal() {
                return;
            }
            row.status = ExecutionStatus::Running;
            row.started_at.get_or_insert(Utc::now());
        })
    }

    async fn mark_completed(&self, execution_id: Uuid) -> Result<(), StoreError> {
        self.update(execution_id, |row| {
            if row.status.is_terminal() {
                return;
            }
            row.status = ExecutionStatus::Completed;
            row.completed_at = Some(Utc::now());
        })
    }

    async fn mark_failed(&self, execution_id: Uuid, error: String) -> Result<(), StoreError> {
        self.update(execution_id, |row| {
            if row.status.is_terminal() {
                return;
            }
            row.status = ExecutionStatus::Failed;
            row.error_message = Some(error);
            row.completed_at = Some(Utc::now());
        })
    }

    async fn mark_stopped(&self, execution_id: Uuid) -> Result<(), StoreError> {
        self.update(execution_id, |row| {
            if row.status.is_terminal() {
                return;
            }
            row.status = ExecutionStatus::Stopped;
            row.completed_at = Some(Utc::now());
        })
    }

    async fn count_active(&self) -> Result<u64, StoreError> {
        Ok(self.rows.lock().values().filter(|r| !r.status.is_terminal()).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::store::test_execution;

    #[tokio::test]
    async fn mark_completed_is_idempotent_after_terminal() {
        let store = InMemoryExecutionStore::new();
        let execution = test_execution(0, None);
        let id = execution.id;
        store.create(execution).await.unwrap();
        store.mark_running(id).await.unwrap();
        store.mark_failed(id, "boom".to_string()).await.unwrap();

        // A retried "complete" step after the workflow already failed must
        // not resurrect it into `completed`.
        store.mark_completed(id).await.unwrap();
        assert_eq!(store.get_status(id).await.unwrap(), ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn count_active_excludes_terminal_rows() {
        let store = InMemoryExecutionStore::new();
        let running = test_execution(0, None);
        let running_id = running.id;
        store.create(running).await.unwrap();
        store.mark_running(running_id).await.unwrap();

        let done = test_execution(0, None);
        let done_id = done.id;
        store.create(done).await.unwrap();
        store.mark_completed(done_id).await.unwrap();

        assert_eq!(store.count_active().await.unwrap(), 1);
    }
}
