//! PostgreSQL-backed [`TaskQueue`], grounded directly on the teacher's
//! `claim_task` (`crates/durable/src/persistence/postgres.rs`): a CTE that
//! selects claimable rows with `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never contend on the same row, then updates and returns them in
//! one statement.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{ClaimedTask, StoreError, TaskDefinition, TaskOutcome, TaskQueue, TaskStatus};

const DEFAULT_MAX_ATTEMPTS: i32 = 3;

#[derive(Clone)]
pub struct PostgresTaskQueue {
    pool: PgPool,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    #[instrument(skip(self, task))]
    async fn enqueue(&self, task: TaskDefinition) -> Result<Uuid, StoreError> {
        let task_id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO chaingraph_queue_entry (
                id, execution_id, flow_id, root_execution_id, parent_execution_id,
                depth, input, priority, app_version, status, max_attempts, attempt
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10, 0)
            ON CONFLICT (execution_id) DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(task.execution_id)
        .bind(task.flow_id)
        .bind(task.root_execution_id)
        .bind(task.parent_execution_id)
        .bind(task.depth as i32)
        .bind(&task.input)
        .bind(task.priority)
        .bind(&task.app_version)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to enqueue task: {e}");
            StoreError::Database(e.to_string())
        })?;

        debug!(%task_id, execution_id = %task.execution_id, "enqueued task");
        Ok(task_id)
    }

    #[instrument(skip(self))]
    async fn claim(
        &self,
        worker_id: &str,
        app_version: &str,
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM chaingraph_queue_entry
                WHERE status = 'pending' AND app_version = $1
                ORDER BY priority DESC, created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE chaingraph_queue_entry t
            SET status = 'claimed',
                claimed_by = $3,
                claimed_at = NOW(),
                heartbeat_at = NOW(),
                attempt = attempt + 1
            FROM claimable c
            WHERE t.id = c.id
            RETURNING t.id, t.execution_id, t.flow_id, t.root_execution_id,
                      t.parent_execution_id, t.depth, t.input, t.priority, t.app_version,
                      t.attempt, t.max_attempts
            "#,
        )
        .bind(app_version)
        .bind(max_tasks as i64)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to claim tasks: {e}");
            StoreError::Database(e.to_string())
        })?;

        let claimed = rows
            .into_iter()
            .map(|row| ClaimedTask {
                id: row.get("id"),
                definition: TaskDefinition {
                    execution_id: row.get("execution_id"),
                    flow_id: row.get("flow_id"),
                    root_execution_id: row.get("root_execution_id"),
                    parent_execution_id: row.get("parent_execution_id"),
                    depth: row.get::<i32, _>("depth") as u32,
                    input: row.get("input"),
                    priority: row.get("priority"),
                    app_version: row.get("app_version"),
                },
                attempt: row.get::<i32, _>("attempt") as u32,
                max_attempts: row.get::<i32, _>("max_attempts") as u32,
            })
            .collect::<Vec<_>>();

        if !claimed.is_empty() {
            debug!(worker_id, count = claimed.len(), "claimed tasks");
        }
        Ok(claimed)
    }

    #[instrument(skip(self))]
    async fn heartbeat(&self, task_id: Uuid, worker_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE chaingraph_queue_entry
            SET heartbeat_at = NOW()
            WHERE id = $1 AND claimed_by = $2 AND status = 'claimed'
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, result))]
    async fn complete(&self, task_id: Uuid, result: serde_json::Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE chaingraph_queue_entry
            SET status = 'completed', result = $2, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(&result)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fail(&self, task_id: Uuid, error_message: String) -> Result<TaskOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT attempt, max_attempts FROM chaingraph_queue_entry WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::TaskNotFound(task_id))?;

        let attempt: i32 = row.get("attempt");
        let max_attempts: i32 = row.get("max_attempts");

        if attempt >= max_attempts {
            sqlx::query(
                r#"
                UPDATE chaingraph_queue_entry
                SET status = 'dead', last_error = $2, completed_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(task_id)
            .bind(&error_message)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
            return Ok(TaskOutcome::ExhaustedRetries);
        }

        sqlx::query(
            r#"
            UPDATE chaingraph_queue_entry
            SET status = 'pending', last_error = $2, claimed_by = NULL, claimed_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(&error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(TaskOutcome::WillRetry { next_attempt: attempt as u32 + 1 })
    }

    #[instrument(skip(self))]
    async fn reclaim_stale(&self, stale_after_secs: i64) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE chaingraph_queue_entry
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL
            WHERE status = 'claimed'
              AND heartbeat_at < NOW() - ($1 || ' seconds')::interval
            "#,
        )
        .bind(stale_after_secs.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let reclaimed = result.rows_affected() as usize;
        if reclaimed > 0 {
            debug!(reclaimed, "reclaimed stale tasks");
        }
        Ok(reclaimed)
    }

    #[instrument(skip(self))]
    async fn status(&self, task_id: Uuid) -> Result<TaskStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM chaingraph_queue_entry WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::TaskNotFound(task_id))?;

        let status: String = row.get("status");
        parse_status(&status)
    }
}

fn parse_status(status: &str) -> Result<TaskStatus, StoreError> {
    match status {
        "pending" => Ok(TaskStatus::Pending),
        "claimed" => Ok(TaskStatus::Claimed),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "dead" => Ok(TaskStatus::Dead),
        other => Err(StoreError::Database(format!("unknown task status: {other}"))),
    }
}
