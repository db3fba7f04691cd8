//! Adapts a durable [`EventStream`] into the engine's [`EventSink`], batching
//! writes so a fast-scheduling flow doesn't round-trip the database once per
//! event. Batches flush at 10 events or 100ms of inactivity, whichever comes
//! first (`SPEC_FULL.md` §4.4's delivery-batching requirement).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::EventStream;
use crate::engine::{event::ExecutionEvent, scheduler::EventSink};

const BATCH_SIZE: usize = 10;
const BATCH_INTERVAL: Duration = Duration::from_millis(100);

pub struct BatchingEventSink {
    store: Arc<dyn EventStream>,
    execution_id: Uuid,
    pending: Mutex<Vec<ExecutionEvent>>,
}

impl BatchingEventSink {
    pub fn new(store: Arc<dyn EventStream>, execution_id: Uuid) -> Self {
        Self { store, execution_id, pending: Mutex::new(Vec::with_capacity(BATCH_SIZE)) }
    }

    /// Flush whatever is buffered right now, regardless of batch size.
    pub async fn flush(&self) {
        let batch = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };
        for event in batch {
            let _ = self.store.append(self.execution_id, event).await;
        }
    }
}

#[async_trait]
impl EventSink for BatchingEventSink {
    async fn emit(&self, event: ExecutionEvent) {
        let is_terminal = event.is_terminal();
        let should_flush = {
            let mut pending = self.pending.lock().await;
            pending.push(event);
            pending.len() >= BATCH_SIZE
        };
        if should_flush || is_terminal {
            self.flush().await;
        }
    }
}

/// Runs alongside a `BatchingEventSink`, flushing on the 100ms timer so a
/// quiet execution's last few events don't wait indefinitely for the
/// size-based flush to trigger.
pub async fn run_flush_timer(sink: Arc<BatchingEventSink>, mut stop: tokio::sync::watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(BATCH_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => sink.flush().await,
            _ = stop.changed() => {
                sink.flush().await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::memory::InMemoryEventStream;

    #[tokio::test]
    async fn batch_flushes_at_size_threshold() {
        let store: Arc<dyn EventStream> = Arc::new(InMemoryEventStream::new());
        let execution_id = Uuid::now_v7();
        let sink = BatchingEventSink::new(store.clone(), execution_id);

        for _ in 0..BATCH_SIZE {
            sink.emit(ExecutionEvent::NodeStarted { node_id: "a".to_string() }).await;
        }

        let records = store.read_all(execution_id).await.unwrap();
        assert_eq!(records.len(), BATCH_SIZE);
    }

    #[tokio::test]
    async fn terminal_event_forces_an_immediate_flush() {
        let store: Arc<dyn EventStream> = Arc::new(InMemoryEventStream::new());
        let execution_id = Uuid::now_v7();
        let sink = BatchingEventSink::new(store.clone(), execution_id);

        sink.emit(ExecutionEvent::NodeStarted { node_id: "a".to_string() }).await;
        sink.emit(ExecutionEvent::FlowCompleted { duration_ms: 1 }).await;

        let records = store.read_all(execution_id).await.unwrap();
        assert_eq!(records.len(), 2);
    }
}
