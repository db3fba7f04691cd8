//! Event stream contract (component C4): the durable, append-only,
//! subscribable record of everything an execution emits.
//!
//! Mirrors the split in the teacher's persistence layer
//! (`crates/durable/src/persistence/store.rs`): a trait describing the
//! durable operations, a `StoreError` taxonomy shared with the rest of this
//! crate, and separate in-memory / Postgres implementations behind it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::engine::ExecutionEvent;

pub use crate::store_error::StoreError;

/// One durable event record: its position in the execution's stream plus
/// the event itself. `index` is assigned by the store, strictly increasing,
/// starting at 0 for the first event the engine emits after
/// `EXECUTION_CREATED` (which the orchestrator always writes at index -1,
/// before the stream proper begins — see `SPEC_FULL.md` §6).
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub index: i64,
    pub event: ExecutionEvent,
}

/// Durable, append-only, subscribable event stream for one execution.
///
/// Implementations must guarantee: events are delivered to subscribers in
/// the order they were appended; a subscriber that joins after events have
/// already been written first receives a backfill of everything from
/// `from_index` onward, then live events with no gap and no duplicate.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Append one event, assigning it the next index for `execution_id`.
    async fn append(&self, execution_id: Uuid, event: ExecutionEvent) -> Result<i64, StoreError>;

    /// Write the workflow-level `EXECUTION_CREATED` marker at the reserved
    /// index -1 (§3, §6). Idempotent — a crash-retried `initializing` step
    /// that calls this twice must not produce two markers or disturb the
    /// non-negative sequence.
    async fn append_created(&self, execution_id: Uuid, event: ExecutionEvent) -> Result<(), StoreError>;

    /// Every event recorded for `execution_id`, in index order (index -1
    /// first, if present).
    async fn read_all(&self, execution_id: Uuid) -> Result<Vec<StreamRecord>, StoreError>;

    /// Subscribe starting from `from_index` (inclusive). The returned
    /// receiver first yields any already-durable events at or after
    /// `from_index` plus any negative-index marker (always delivered
    /// regardless of `from_index`, §4.4), then live events as they are
    /// appended. Closed once the execution reaches a terminal event
    /// ([`ExecutionEvent::is_terminal`]).
    async fn subscribe(
        &self,
        execution_id: Uuid,
        from_index: i64,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamRecord>, StoreError>;
}
