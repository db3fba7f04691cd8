//! PostgreSQL-backed [`ExecutionStore`], grounded on the teacher's
//! `update_workflow_status`/`get_workflow_info` (`crates/durable/src/
//! persistence/postgres.rs`): a single `execution_row` table updated by
//! narrow, idempotent `UPDATE ... WHERE status NOT IN (terminal)`
//! statements, so a crash-retried checkpoint step never regresses a row
//! that already reached a terminal state.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{
    ExecutionRow, ExecutionStatus, ExecutionStore, NewExecution, StoreError, TriggerEventData,
};

#[derive(Clone)]
pub struct PostgresExecutionStore {
    pool: PgPool,
}

impl PostgresExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    #[instrument(skip(self, execution))]
    async fn create(&self, execution: NewExecution) -> Result<(), StoreError> {
        let event_data = execution
            .event_data
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO chaingraph_execution_row (
                id, flow_id, owner_id, status, debug, created_at,
                root_execution_id, parent_execution_id, execution_depth,
                integration_context, event_data
            )
            VALUES ($1, $2, $3, 'created', $4, NOW(), $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(execution.id)
        .bind(execution.flow_id)
        .bind(&execution.owner_id)
        .bind(execution.debug)
        .bind(execution.root_execution_id)
        .bind(execution.parent_execution_id)
        .bind(execution.execution_depth as i32)
        .bind(&execution.integration_context)
        .bind(&event_data)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create execution row: {e}");
            StoreError::Database(e.to_string())
        })?;

        debug!(execution_id = %execution.id, "created execution row");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, execution_id: Uuid) -> Result<ExecutionRow, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, flow_id, owner_id, status, debug, created_at, started_at,
                   completed_at, error_message, root_execution_id, parent_execution_id,
                   execution_depth, integration_context, event_data
            FROM chaingraph_execution_row
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        let status: String = row.get("status");
        let event_data_json: Option<serde_json::Value> = row.get("event_data");
        let event_data = event_data_json
            .map(serde_json::from_value::<TriggerEventData>)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(ExecutionRow {
            id: row.get("id"),
            flow_id: row.get("flow_id"),
            owner_id: row.get("owner_id"),
            status: parse_status(&status)?,
            debug: row.get("debug"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            error_message: row.get("error_message"),
            root_execution_id: row.get("root_execution_id"),
            parent_execution_id: row.get("parent_execution_id"),
            execution_depth: row.get::<i32, _>("execution_depth") as u32,
            integration_context: row.get("integration_context"),
            event_data,
        })
    }

    async fn get_status(&self, execution_id: Uuid) -> Result<ExecutionStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM chaingraph_execution_row WHERE id = $1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;
        parse_status(&row.get::<String, _>("status"))
    }

    #[instrument(skip(self))]
    async fn mark_running(&self, execution_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE chaingraph_execution_row
            SET status = 'running', started_at = COALESCE(started_at, NOW())
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'stopped')
            "#,
        )
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_completed(&self, execution_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE chaingraph_execution_row
            SET status = 'completed', completed_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'stopped')
            "#,
        )
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_failed(&self, execution_id: Uuid, error: String) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE chaingraph_execution_row
            SET status = 'failed', error_message = $2, completed_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'stopped')
            "#,
        )
        .bind(execution_id)
        .bind(&error)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_stopped(&self, execution_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE chaingraph_execution_row
            SET status = 'stopped', completed_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'stopped')
            "#,
        )
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn count_active(&self) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS active
            FROM chaingraph_execution_row
            WHERE status NOT IN ('completed', 'failed', 'stopped')
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(row.get::<i64, _>("active") as u64)
    }
}

fn parse_status(status: &str) -> Result<ExecutionStatus, StoreError> {
    match status {
        "created" => Ok(ExecutionStatus::Created),
        "queued" => Ok(ExecutionStatus::Queued),
        "running" => Ok(ExecutionStatus::Running),
        "paused" => Ok(ExecutionStatus::Paused),
        "completed" => Ok(ExecutionStatus::Completed),
        "failed" => Ok(ExecutionStatus::Failed),
        "stopped" => Ok(ExecutionStatus::Stopped),
        other => Err(StoreError::Database(format!("unknown execution status: {other}"))),
    }
}
