//! Shared store-error taxonomy for the durable event stream (C4) and task
//! queue (C5) — both are views onto the same Postgres instance, so they
//! share one error type rather than forcing every caller to match two
//! near-identical enums. Mirrors `crates/durable/src/persistence/store.rs`'s
//! `StoreError`.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("concurrency conflict: expected sequence {expected}, got {actual}")]
    ConcurrencyConflict { expected: i64, actual: i64 },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
