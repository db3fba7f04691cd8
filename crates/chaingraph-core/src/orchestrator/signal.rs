//! Durable signal delivery: `START_SIGNAL` and debug commands
//! (`PAUSE`/`RESUME`/`STEP`/`STOP`), mirroring the teacher's
//! `send_signal`/`get_pending_signals`/`mark_signals_processed` trio
//! (`crates/durable/src/persistence/store.rs`,
//! `crates/durable/src/workflow/signal.rs`) over a `workflow_message`-style
//! table — here `chaingraph_execution_signal` — rather than an in-process
//! channel, so a signal sent to a worker that crashes before consuming it is
//! still delivered once a worker resumes that execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::DebugCommand;
use crate::store_error::StoreError;

/// A topic-tagged payload delivered to one execution. `START_SIGNAL` carries
/// no payload; debug commands carry the serialized [`DebugCommand`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    StartSignal,
    Debug(DebugCommand),
}

#[derive(Debug, Clone)]
pub struct PendingSignal {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub signal: Signal,
    pub received_at: DateTime<Utc>,
}

/// Durable mailbox for execution-scoped signals. One implementation is
/// Postgres-backed (polled by the orchestrator's debug-command loop and
/// awaited-on for `START_SIGNAL`); tests use an in-memory one.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn send(&self, execution_id: Uuid, signal: Signal) -> Result<(), StoreError>;

    /// Every signal delivered to `execution_id` since it was last marked
    /// processed, oldest first.
    async fn pending(&self, execution_id: Uuid) -> Result<Vec<PendingSignal>, StoreError>;

    /// Mark the given signals consumed so a later poll does not redeliver
    /// them; idempotent if called twice with an already-processed id.
    async fn mark_processed(&self, ids: &[Uuid]) -> Result<(), StoreError>;
}

#[cfg(test)]
pub(crate) mod tests_support {
    pub const POLL_INTERVAL_MS: u64 = 25;
}
