//! The `execution_row` mirror (§6): the application-level view of one
//! execution's lifecycle, updated only by orchestrator steps.
//!
//! Split out from the task queue (C5) and event stream (C4) stores even
//! though all three share one Postgres instance, because this row's
//! lifecycle is owned by the orchestrator's state machine rather than by
//! queue claim/dequeue semantics or append-only log writes — mirrors the
//! teacher's own `WorkflowInfo`/`update_workflow_status` split
//! (`crates/durable/src/persistence/store.rs`) from its task and event
//! concerns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::store_error::StoreError;

/// Execution lifecycle status, mirroring the state machine in
/// `SPEC_FULL.md` §4.6. `Paused` is observable between a `FLOW_PAUSED`
/// event and its matching `FLOW_RESUMED`; it is not itself a terminal or
/// checkpointed step transition, so the orchestrator does not write it to
/// this row (only the in-process engine and the event stream know about
/// it) — included here for completeness of the closed set named in §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Created,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// Opaque external-integration context (e.g. a wallet/agent session) a
/// child execution inherits as an immutable snapshot captured at spawn
/// time — never a live pointer into the parent's state (`SPEC_FULL.md` §9,
/// "Cyclic references").
pub type IntegrationContext = serde_json::Value;

/// The event that triggered a child execution: the emitting node's event
/// name and payload (`None` for a root execution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEventData {
    pub event_name: String,
    pub payload: serde_json::Value,
}

/// One row of the `execution_row` table (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub owner_id: Option<String>,
    pub status: ExecutionStatus,
    pub debug: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub root_execution_id: Uuid,
    pub parent_execution_id: Option<Uuid>,
    pub execution_depth: u32,
    pub integration_context: IntegrationContext,
    pub event_data: Option<TriggerEventData>,
}

/// What a fresh execution needs at creation time; everything else in
/// [`ExecutionRow`] is either derived or set by later steps.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub owner_id: Option<String>,
    pub debug: bool,
    pub root_execution_id: Uuid,
    pub parent_execution_id: Option<Uuid>,
    pub execution_depth: u32,
    pub integration_context: IntegrationContext,
    pub event_data: Option<TriggerEventData>,
}

/// Durable store for the execution-row mirror. One implementation is
/// Postgres-backed; tests use an in-memory one.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution: NewExecution) -> Result<(), StoreError>;

    async fn get(&self, execution_id: Uuid) -> Result<ExecutionRow, StoreError>;

    async fn get_status(&self, execution_id: Uuid) -> Result<ExecutionStatus, StoreError>;

    /// Checkpointed step: `created`/`queued` → `running`. Idempotent — a
    /// crash-retried call against an already-`running` row is a no-op, not
    /// an error, so a replayed step never fails the workflow it is trying
    /// to resume.
    async fn mark_running(&self, execution_id: Uuid) -> Result<(), StoreError>;

    async fn mark_completed(&self, execution_id: Uuid) -> Result<(), StoreError>;

    async fn mark_failed(&self, execution_id: Uuid, error: String) -> Result<(), StoreError>;

    async fn mark_stopped(&self, execution_id: Uuid) -> Result<(), StoreError>;

    /// Count of non-terminal executions, used to enforce global
    /// concurrency (C_global) before a worker claims more tasks than the
    /// cluster-wide budget allows.
    async fn count_active(&self) -> Result<u64, StoreError>;
}

#[cfg(test)]
pub(crate) fn test_execution(depth: u32, parent: Option<Uuid>) -> NewExecution {
    let id = Uuid::now_v7();
    NewExecution {
        id,
        flow_id: Uuid::now_v7(),
        owner_id: None,
        debug: false,
        root_execution_id: parent.unwrap_or(id),
        parent_execution_id: parent,
        execution_depth: depth,
        integration_context: serde_json::json!({}),
        event_data: None,
    }
}
