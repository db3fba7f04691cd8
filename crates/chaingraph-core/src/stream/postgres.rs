//! PostgreSQL-backed [`EventStream`].
//!
//! The append/read shape follows the teacher's `PostgresWorkflowEventStore::
//! append_events`/`load_events` (`crates/durable/src/persistence/
//! postgres.rs`): a `SELECT ... FOR UPDATE` against the max index to
//! serialize concurrent writers, then a plain `INSERT`. Live fan-out adds a
//! per-process `tokio::sync::broadcast` channel keyed by execution id, since
//! the teacher's store has no subscriber concept of its own — workflow
//! completion there is observed by polling `get_workflow_status`, not by
//! streaming.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{PgPool, Row};
use tokio::sync::{broadcast, mpsc};
use tracing::error;
use uuid::Uuid;

use super::store::{EventStream, StoreError, StreamRecord};
use crate::engine::ExecutionEvent;

const LIVE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct PostgresEventStream {
    pool: PgPool,
    live: Arc<Mutex<HashMap<Uuid, broadcast::Sender<StreamRecord>>>>,
}

impl PostgresEventStream {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, live: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn live_channel(&self, execution_id: Uuid) -> broadcast::Sender<StreamRecord> {
        self.live
            .lock()
            .entry(execution_id)
            .or_insert_with(|| broadcast::channel(LIVE_CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl EventStream for PostgresEventStream {
    async fn append(&self, execution_id: Uuid, event: ExecutionEvent) -> Result<i64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(index) + 1, 0) AS next_index
            FROM chaingraph_execution_stream
            WHERE execution_id = $1
            FOR UPDATE
            "#,
        )
        .bind(execution_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        let index: i64 = row.get("next_index");

        let payload =
            serde_json::to_value(&event).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO chaingraph_execution_stream (execution_id, index, event_type, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(execution_id)
        .bind(index)
        .bind(event_type_name(&event))
        .bind(&payload)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Database(e.to_string()))?;

        let record = StreamRecord { index, event };
        let sender = self.live_channel(execution_id);
        let _ = sender.send(record);
        Ok(index)
    }

    async fn append_created(&self, execution_id: Uuid, event: ExecutionEvent) -> Result<(), StoreError> {
        let payload =
            serde_json::to_value(&event).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO chaingraph_execution_stream (execution_id, index, event_type, payload)
            VALUES ($1, -1, $2, $3)
            ON CONFLICT (execution_id, index) DO NOTHING
            "#,
        )
        .bind(execution_id)
        .bind(event_type_name(&event))
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let sender = self.live_channel(execution_id);
        let _ = sender.send(StreamRecord { index: -1, event });
        Ok(())
    }

    async fn read_all(&self, execution_id: Uuid) -> Result<Vec<StreamRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT index, payload
            FROM chaingraph_execution_stream
            WHERE execution_id = $1
            ORDER BY index
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let index: i64 = row.get("index");
            let payload: serde_json::Value = row.get("payload");
            let event: ExecutionEvent =
                serde_json::from_value(payload).map_err(|e| StoreError::Serialization(e.to_string()))?;
            records.push(StreamRecord { index, event });
        }
        Ok(records)
    }

    async fn subscribe(
        &self,
        execution_id: Uuid,
        from_index: i64,
    ) -> Result<mpsc::Receiver<StreamRecord>, StoreError> {
        let backfill = self.read_all(execution_id).await?;
        let mut live_rx = self.live_channel(execution_id).subscribe();

        let (tx, rx) = mpsc::channel(256);
        for record in backfill.into_iter().filter(|r| r.index < 0 || r.index >= from_index) {
            if tx.send(record).await.is_err() {
                return Ok(rx);
            }
        }

        tokio::spawn(async move {
            loop {
                match live_rx.recv().await {
                    Ok(record) => {
                        if record.index >= 0 && record.index < from_index {
                            continue;
                        }
                        if tx.send(record).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        error!(skipped, "subscriber fell behind live event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

fn event_type_name(event: &ExecutionEvent) -> &'static str {
    match event {
        ExecutionEvent::ExecutionCreated { .. } => "EXECUTION_CREATED",
        ExecutionEvent::FlowSubscribed { .. } => "FLOW_SUBSCRIBED",
        ExecutionEvent::FlowStarted => "FLOW_STARTED",
        ExecutionEvent::FlowCompleted { .. } => "FLOW_COMPLETED",
        ExecutionEvent::FlowFailed { .. } => "FLOW_FAILED",
        ExecutionEvent::FlowCancelled { .. } => "FLOW_CANCELLED",
        ExecutionEvent::FlowPaused => "FLOW_PAUSED",
        ExecutionEvent::FlowResumed => "FLOW_RESUMED",
        ExecutionEvent::NodeStarted { .. } => "NODE_STARTED",
        ExecutionEvent::NodeCompleted { .. } => "NODE_COMPLETED",
        ExecutionEvent::NodeFailed { .. } => "NODE_FAILED",
        ExecutionEvent::NodeSkipped { .. } => "NODE_SKIPPED",
        ExecutionEvent::NodeStatusChanged { .. } => "NODE_STATUS_CHANGED",
        ExecutionEvent::EdgeTransferStarted { .. } => "EDGE_TRANSFER_STARTED",
        ExecutionEvent::EdgeTransferCompleted { .. } => "EDGE_TRANSFER_COMPLETED",
        ExecutionEvent::EdgeTransferFailed { .. } => "EDGE_TRANSFER_FAILED",
        ExecutionEvent::DebugBreakpointHit { .. } => "DEBUG_BREAKPOINT_HIT",
    }
}
