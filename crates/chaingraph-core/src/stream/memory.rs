//! In-memory [`EventStream`], used by tests and by `chaingraph-worker` when
//! no `DATABASE_URL` is configured for a local, single-process run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::store::{EventStream, StoreError, StreamRecord};
use crate::engine::ExecutionEvent;

struct ExecutionLog {
    records: Vec<StreamRecord>,
    subscribers: Vec<mpsc::Sender<StreamRecord>>,
}

#[derive(Default)]
pub struct InMemoryEventStream {
    logs: Arc<Mutex<HashMap<Uuid, ExecutionLog>>>,
}

impl InMemoryEventStream {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStream for InMemoryEventStream {
    async fn append(&self, execution_id: Uuid, event: ExecutionEvent) -> Result<i64, StoreError> {
        let mut logs = self.logs.lock();
        let log = logs.entry(execution_id).or_insert_with(|| ExecutionLog {
            records: Vec::new(),
            subscribers: Vec::new(),
        });
        let index = log.records.iter().filter(|r| r.index >= 0).count() as i64;
        let record = StreamRecord { index, event };
        log.records.push(record.clone());
        log.subscribers.retain(|tx| tx.try_send(record.clone()).is_ok());
        Ok(index)
    }

    async fn append_created(&self, execution_id: Uuid, event: ExecutionEvent) -> Result<(), StoreError> {
        let mut logs = self.logs.lock();
        let log = logs.entry(execution_id).or_insert_with(|| ExecutionLog {
            records: Vec::new(),
            subscribers: Vec::new(),
        });
        if log.records.iter().any(|r| r.index == -1) {
            return Ok(());
        }
        let record = StreamRecord { index: -1, event };
        log.records.insert(0, record.clone());
        log.subscribers.retain(|tx| tx.try_send(record.clone()).is_ok());
        Ok(())
    }

    async fn read_all(&self, execution_id: Uuid) -> Result<Vec<StreamRecord>, StoreError> {
        Ok(self
            .logs
            .lock()
            .get(&execution_id)
            .map(|log| log.records.clone())
            .unwrap_or_default())
    }

    async fn subscribe(
        &self,
        execution_id: Uuid,
        from_index: i64,
    ) -> Result<mpsc::Receiver<StreamRecord>, StoreError> {
        let (tx, rx) = mpsc::channel(256);
        let mut logs = self.logs.lock();
        let log = logs.entry(execution_id).or_insert_with(|| ExecutionLog {
            records: Vec::new(),
            subscribers: Vec::new(),
        });
        for record in log.records.iter().filter(|r| r.index < 0 || r.index >= from_index) {
            let _ = tx.try_send(record.clone());
        }
        log.subscribers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backfill_then_live_delivery_has_no_gap() {
        let store = InMemoryEventStream::new();
        let execution_id = Uuid::now_v7();
        store.append(execution_id, ExecutionEvent::FlowStarted).await.unwrap();
        store
            .append(execution_id, ExecutionEvent::NodeStarted { node_id: "a".into() })
            .await
            .unwrap();

        let mut rx = store.subscribe(execution_id, 0).await.unwrap();
        store
            .append(execution_id, ExecutionEvent::FlowCompleted { duration_ms: 5 })
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().index);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn execution_created_marker_gets_index_negative_one_and_does_not_shift_later_indices() {
        let store = InMemoryEventStream::new();
        let execution_id = Uuid::now_v7();
        let marker = ExecutionEvent::ExecutionCreated {
            flow_id: Uuid::now_v7(),
            root_execution_id: execution_id,
            parent_execution_id: None,
            depth: 0,
        };
        store.append_created(execution_id, marker.clone()).await.unwrap();
        store.append_created(execution_id, marker).await.unwrap(); // idempotent
        let first = store.append(execution_id, ExecutionEvent::FlowStarted).await.unwrap();

        assert_eq!(first, 0, "EXECUTION_CREATED must not consume index 0");
        let all = store.read_all(execution_id).await.unwrap();
        assert_eq!(all.len(), 2, "the duplicate marker must not be recorded twice");
        assert_eq!(all[0].index, -1);
        assert_eq!(all[1].index, 0);
    }

    #[tokio::test]
    async fn negative_index_marker_is_delivered_regardless_of_from_index() {
        let store = InMemoryEventStream::new();
        let execution_id = Uuid::now_v7();
        store
            .append_created(
                execution_id,
                ExecutionEvent::ExecutionCreated {
                    flow_id: Uuid::now_v7(),
                    root_execution_id: execution_id,
                    parent_execution_id: None,
                    depth: 0,
                },
            )
            .await
            .unwrap();
        store.append(execution_id, ExecutionEvent::FlowStarted).await.unwrap();
        store.append(execution_id, ExecutionEvent::FlowCompleted { duration_ms: 1 }).await.unwrap();

        let mut rx = store.subscribe(execution_id, 1).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.index, -1, "the EXECUTION_CREATED marker is always delivered first");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.index, 1);
    }

    #[tokio::test]
    async fn subscribing_mid_stream_skips_earlier_indices() {
        let store = InMemoryEventStream::new();
        let execution_id = Uuid::now_v7();
        store.append(execution_id, ExecutionEvent::FlowStarted).await.unwrap();
        store
            .append(execution_id, ExecutionEvent::NodeStarted { node_id: "a".into() })
            .await
            .unwrap();

        let mut rx = store.subscribe(execution_id, 1).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.index, 1);
    }
}
