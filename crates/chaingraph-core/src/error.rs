//! Crate-wide error taxonomy
//!
//! Each variant corresponds to one of the error classes a caller at any
//! layer (engine, queue, stream, orchestrator) may need to distinguish.
//! Lower-layer errors (`StoreError`, `FlowError`) convert into this type
//! via `#[from]` so callers at the orchestrator boundary can match on one
//! enum.

use uuid::Uuid;

use crate::graph::FlowError;
use crate::queue::StoreError;

/// Top-level error for the durable flow-execution core.
#[derive(Debug, thiserror::Error)]
pub enum ChaingraphError {
    /// Flow or port configuration invalid.
    #[error("validation error: {0}")]
    Validation(#[from] FlowError),

    /// A referenced flow, node, port, or execution does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// START_SIGNAL was not received within the configured timeout.
    #[error("start signal timeout for execution {0} after {1:?}")]
    StartTimeout(Uuid, std::time::Duration),

    /// Child-execution depth exceeded the configured maximum.
    #[error("execution depth exceeded: depth {depth} > max {max}")]
    DepthExceeded {
        /// The depth the child execution would have had.
        depth: u32,
        /// The configured maximum depth.
        max: u32,
    },

    /// A node's `execute` failed.
    #[error("node {node_id} failed: {message}")]
    NodeFailure {
        /// The failing node's identifier.
        node_id: String,
        /// Human-readable failure message.
        message: String,
    },

    /// Execution was aborted (STOP command, parent termination, or deadline).
    #[error("execution {0} aborted: {1}")]
    Aborted(Uuid, String),

    /// Enqueuer and worker application versions do not match.
    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// The application version the worker runs.
        expected: String,
        /// The application version the task was submitted for.
        found: String,
    },

    /// Transient failure in the durable store; caller should retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Unrecoverable internal inconsistency.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Error surfaced by the durable store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization failure at a crate boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChaingraphError {
    /// Whether retrying the operation that produced this error is sensible.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChaingraphError::Transient(_))
    }
}
