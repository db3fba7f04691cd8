//! PostgreSQL-backed [`SignalStore`] over `chaingraph_execution_signal`,
//! mirroring the teacher's `workflow_message` table
//! (`crates/durable/src/persistence/postgres.rs`): signals are rows, not an
//! in-process channel, so `START_SIGNAL` sent before a worker picks up the
//! task is not lost.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::signal::{PendingSignal, Signal, SignalStore};
use crate::store_error::StoreError;

pub struct PostgresSignalStore {
    pool: PgPool,
}

impl PostgresSignalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignalStore for PostgresSignalStore {
    async fn send(&self, execution_id: Uuid, signal: Signal) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&signal).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO chaingraph_execution_signal (id, execution_id, payload, received_at, processed_at)
            VALUES ($1, $2, $3, NOW(), NULL)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(execution_id)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn pending(&self, execution_id: Uuid) -> Result<Vec<PendingSignal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, execution_id, payload, received_at
            FROM chaingraph_execution_signal
            WHERE execution_id = $1 AND processed_at IS NULL
            ORDER BY received_at ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.get("payload");
                let signal = serde_json::from_value(payload).map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(PendingSignal {
                    id: row.get("id"),
                    execution_id: row.get("execution_id"),
                    signal,
                    received_at: row.get("received_at"),
                })
            })
            .collect()
    }

    async fn mark_processed(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        sqlx::query("UPDATE chaingraph_execution_signal SET processed_at = NOW() WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}
