//! Task queue contract (component C5): durable, crash-safe handoff of work
//! between the orchestrator and the worker pool.
//!
//! Mirrors the teacher's `WorkflowEventStore` task-queue methods
//! (`crates/durable/src/persistence/store.rs`): `enqueue`/`claim`/`complete`/
//! `fail` over a typed `QueuedTask`, with `StoreError` shared across both
//! the stream and the queue since they are views onto the same database.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::store_error::StoreError;

/// A unit of queued work: run one execution (root or child) to completion.
/// Deduplicated by `execution_id` so a worker crash that leaves a task
/// claimed-but-unfinished can be safely reclaimed and retried without
/// double-running the same execution from scratch (the orchestrator resumes
/// from the event log, not from the task payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub execution_id: Uuid,
    pub flow_id: Uuid,
    pub root_execution_id: Uuid,
    pub parent_execution_id: Option<Uuid>,
    pub depth: u32,
    pub input: serde_json::Value,
    pub priority: i32,
    /// The `APP_VERSION` the enqueuer ran under. A worker only claims tasks
    /// whose `app_version` matches its own (§6, §7 `VersionMismatch`) — a
    /// task submitted for code a worker doesn't run stays queued rather
    /// than being dequeued and misinterpreted.
    pub app_version: String,
}

#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub id: Uuid,
    pub definition: TaskDefinition,
    pub attempt: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
    Dead,
}

/// Durable task queue. One implementation is Postgres-backed
/// (`SELECT ... FOR UPDATE SKIP LOCKED`); tests use an in-memory one.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: TaskDefinition) -> Result<Uuid, StoreError>;

    /// Claim up to `max_tasks` pending tasks for `worker_id` whose
    /// `app_version` equals `app_version`, atomically marking them claimed
    /// so no other worker can also claim them. A pending task whose
    /// `app_version` doesn't match is left pending rather than claimed.
    async fn claim(
        &self,
        worker_id: &str,
        app_version: &str,
        max_tasks: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError>;

    /// Extend a claimed task's visibility deadline; returns whether the
    /// claim is still valid (a worker whose heartbeat is rejected must stop
    /// running the task — it has already been reclaimed as stale).
    async fn heartbeat(&self, task_id: Uuid, worker_id: &str) -> Result<bool, StoreError>;

    async fn complete(&self, task_id: Uuid, result: serde_json::Value) -> Result<(), StoreError>;

    async fn fail(&self, task_id: Uuid, error: String) -> Result<TaskOutcome, StoreError>;

    /// Reclaim tasks whose heartbeat is older than `stale_after`, making
    /// them claimable again. Called periodically by every worker.
    async fn reclaim_stale(&self, stale_after_secs: i64) -> Result<usize, StoreError>;

    async fn status(&self, task_id: Uuid) -> Result<TaskStatus, StoreError>;
}

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    WillRetry { next_attempt: u32 },
    ExhaustedRetries,
}
