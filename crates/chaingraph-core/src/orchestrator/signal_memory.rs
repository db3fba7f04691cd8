//! In-memory [`SignalStore`] for tests and single-process local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::signal::{PendingSignal, Signal, SignalStore};
use crate::store_error::StoreError;

#[derive(Default)]
pub struct InMemorySignalStore {
    inbox: Arc<Mutex<HashMap<Uuid, Vec<PendingSignal>>>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn send(&self, execution_id: Uuid, signal: Signal) -> Result<(), StoreError> {
        self.inbox.lock().entry(execution_id).or_default().push(PendingSignal {
            id: Uuid::now_v7(),
            execution_id,
            signal,
            received_at: Utc::now(),
        });
        Ok(())
    }

    async fn pending(&self, execution_id: Uuid) -> Result<Vec<PendingSignal>, StoreError> {
        Ok(self.inbox.lock().get(&execution_id).cloned().unwrap_or_default())
    }

    async fn mark_processed(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        let mut inbox = self.inbox.lock();
        for signals in inbox.values_mut() {
            signals.retain(|s| !ids.contains(&s.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::signal::Signal;

    #[tokio::test]
    async fn start_signal_is_delivered_once_and_then_drained() {
        let store = InMemorySignalStore::new();
        let execution_id = Uuid::now_v7();
        store.send(execution_id, Signal::StartSignal).await.unwrap();

        let pending = store.pending(execution_id).await.unwrap();
        assert_eq!(pending.len(), 1);

        store.mark_processed(&[pending[0].id]).await.unwrap();
        assert!(store.pending(execution_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn signals_for_different_executions_do_not_cross_over() {
        let store = InMemorySignalStore::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        store.send(a, Signal::StartSignal).await.unwrap();

        assert_eq!(store.pending(a).await.unwrap().len(), 1);
        assert!(store.pending(b).await.unwrap().is_empty());
    }
}
