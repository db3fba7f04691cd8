//! Workflow orchestrator (component C6): the durability layer sitting above
//! the in-process [`ExecutionEngine`](crate::engine::ExecutionEngine).
//!
//! Where the engine knows how to run one already-instantiated flow to
//! completion, the orchestrator owns the parts that make an execution
//! resumable and hierarchical: waiting for `START_SIGNAL`, checkpointing
//! status transitions to the execution row, streaming engine events through
//! a durable, batched sink, polling for debug commands, and turning the
//! engine's emitted child events into queued child executions whose
//! terminal results are folded back into this execution's outcome.
//!
//! Grounded on the teacher's `WorkflowExecutor::process_workflow`
//! (`crates/durable/src/engine/executor.rs`) for the overall
//! load-replay-checkpoint shape, generalized from single-workflow replay to
//! a root/child execution tree.

pub mod memory;
pub mod postgres;
pub mod signal;
pub mod signal_memory;
pub mod signal_postgres;
pub mod store;

pub use memory::InMemoryExecutionStore;
pub use postgres::PostgresExecutionStore;
pub use signal::{PendingSignal, Signal, SignalStore};
pub use signal_memory::InMemorySignalStore;
pub use signal_postgres::PostgresSignalStore;
pub use store::{ExecutionRow, ExecutionStatus, ExecutionStore, IntegrationContext, NewExecution, TriggerEventData};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig as CoreConfig;
use crate::engine::{
    AbortController, CommandController, DebugCommand, EmittedChildEvent, EngineConfig, EventSink,
    ExecutionEngine, ExecutionOutcome, FlowRunStatus,
};
use crate::error::ChaingraphError;
use crate::graph::{Flow, NodeRegistry};
use crate::queue::{TaskDefinition, TaskQueue};
use crate::stream::{BatchingEventSink, EventStream};

/// Overall result of running one execution through the orchestrator,
/// folding in the terminal status of every child it spawned.
#[derive(Debug)]
pub struct OrchestratorOutcome {
    pub status: FlowRunStatus,
    pub error: Option<String>,
    pub child_execution_ids: Vec<Uuid>,
}

pub struct Orchestrator {
    executions: Arc<dyn ExecutionStore>,
    tasks: Arc<dyn TaskQueue>,
    stream: Arc<dyn EventStream>,
    signals: Arc<dyn SignalStore>,
    registry: Arc<NodeRegistry>,
    engine: ExecutionEngine,
    config: CoreConfig,
}

impl Orchestrator {
    pub fn new(
        executions: Arc<dyn ExecutionStore>,
        tasks: Arc<dyn TaskQueue>,
        stream: Arc<dyn EventStream>,
        signals: Arc<dyn SignalStore>,
        registry: Arc<NodeRegistry>,
        config: CoreConfig,
    ) -> Self {
        Self {
            executions,
            tasks,
            stream,
            signals,
            registry,
            engine: ExecutionEngine::new(EngineConfig::default()),
            config,
        }
    }

    /// Run one claimed execution end to end: wait for its start signal,
    /// drive the engine, checkpoint the result, and recursively drive any
    /// child executions it emitted.
    #[instrument(skip(self, flow), fields(%execution_id))]
    pub async fn run(&self, execution_id: Uuid, flow: &Flow, debug: bool) -> Result<OrchestratorOutcome, ChaingraphError> {
        let row = self.executions.get(execution_id).await?;
        let is_root = row.parent_execution_id.is_none();
        let start_timeout = if is_root {
            self.config.start_signal_timeout_root
        } else {
            self.config.start_signal_timeout_child
        };

        // `initializing`: write the workflow-level EXECUTION_CREATED marker
        // at index -1 before anything else touches the stream (§4.6, §6).
        // Idempotent, so a crash-retried run never produces a duplicate.
        self.stream
            .append_created(
                execution_id,
                crate::engine::ExecutionEvent::ExecutionCreated {
                    flow_id: flow.id,
                    root_execution_id: row.root_execution_id,
                    parent_execution_id: row.parent_execution_id,
                    depth: row.execution_depth,
                },
            )
            .await?;

        if let Err(e) = self.await_start_signal(execution_id, start_timeout).await {
            // State machine: awaiting-start --start-timeout--> failed,
            // step updateToFailed("start timeout") (§4.6).
            self.executions.mark_failed(execution_id, "start timeout".to_string()).await?;
            return Err(e);
        }
        self.executions.mark_running(execution_id).await?;

        let nodes = flow.instantiate_nodes(&self.registry)?;
        let abort = AbortController::new();
        let commands = Arc::new(CommandController::new());
        let sink = Arc::new(BatchingEventSink::new(self.stream.clone(), execution_id));

        let (stop_tx, stop_rx) = watch::channel(false);
        let debug_task = debug.then(|| {
            tokio::spawn(poll_debug_commands(
                self.signals.clone(),
                execution_id,
                abort.clone(),
                commands.clone(),
                stop_rx.clone(),
            ))
        });
        // Parent monitoring (§4.6, §5): a child execution polls its
        // parent's status and aborts as soon as the parent reaches any
        // terminal status. Root executions have no parent to watch.
        let parent_task = row.parent_execution_id.map(|parent_id| {
            tokio::spawn(poll_parent_status(
                self.executions.clone(),
                parent_id,
                abort.clone(),
                self.config.parent_poll_interval,
                stop_rx.clone(),
            ))
        });
        let flush_task = tokio::spawn(crate::stream::run_flush_timer(sink.clone(), stop_rx));

        // A root execution carries no trigger event; a child execution's
        // input is the payload of the event that spawned it (`event_data`,
        // set by `spawn_children` below).
        let trigger_event =
            (!is_root).then(|| row.event_data.as_ref().map(|e| (e.event_name.clone(), e.payload.clone()))).flatten();
        let outcome = self
            .engine
            .execute(flow, nodes, execution_id, abort, commands, sink.as_ref() as &dyn EventSink, trigger_event)
            .await;

        let _ = stop_tx.send(true);
        let _ = flush_task.await;
        if let Some(handle) = debug_task {
            let _ = handle.await;
        }
        if let Some(handle) = parent_task {
            let _ = handle.await;
        }
        sink.flush().await;

        self.checkpoint_engine_outcome(execution_id, &outcome).await?;

        let spawned = self
            .spawn_children(execution_id, flow, row.root_execution_id, row.execution_depth, &outcome.child_tasks)
            .await;

        // Depth-exceeded is a fatal error at child-spawn time (§4.6), but it
        // must still land the parent execution in a terminal `failed` state
        // with the "depth exceeded" message rather than bubbling a bare Err
        // out of `run` and leaving the row stuck `running`.
        let (final_status, final_error, child_ids) = match spawned {
            Ok(child_ids) => {
                let status = self.await_and_fold_children(execution_id, outcome.status, &child_ids, flow).await?;
                (status, outcome.error, child_ids)
            }
            Err(ChaingraphError::DepthExceeded { depth, max }) => {
                let message = format!("depth exceeded: {depth} > {max}");
                warn!(%execution_id, %message, "failing execution: depth exceeded");
                (FlowRunStatus::Failed, Some(message), Vec::new())
            }
            Err(other) => return Err(other),
        };
        self.checkpoint_final_status(execution_id, final_status, final_error.clone()).await?;

        Ok(OrchestratorOutcome {
            status: final_status,
            error: final_error,
            child_execution_ids: child_ids,
        })
    }

    async fn await_start_signal(&self, execution_id: Uuid, timeout: Duration) -> Result<(), ChaingraphError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let pending = self.signals.pending(execution_id).await?;
            let start = pending.iter().find(|p| matches!(p.signal, Signal::StartSignal));
            if let Some(start) = start {
                self.signals.mark_processed(&[start.id]).await?;
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ChaingraphError::StartTimeout(execution_id, timeout));
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn checkpoint_engine_outcome(
        &self,
        execution_id: Uuid,
        outcome: &ExecutionOutcome,
    ) -> Result<(), ChaingraphError> {
        match outcome.status {
            FlowRunStatus::Completed => {
                debug!(%execution_id, "engine run completed, awaiting children before checkpoint");
            }
            FlowRunStatus::Failed => {
                warn!(%execution_id, error = ?outcome.error, "engine run failed");
            }
            FlowRunStatus::Stopped => {
                info!(%execution_id, "engine run stopped");
            }
        }
        Ok(())
    }

    async fn checkpoint_final_status(
        &self,
        execution_id: Uuid,
        status: FlowRunStatus,
        error: Option<String>,
    ) -> Result<(), ChaingraphError> {
        match status {
            FlowRunStatus::Completed => self.executions.mark_completed(execution_id).await?,
            FlowRunStatus::Failed => {
                self.executions.mark_failed(execution_id, error.unwrap_or_else(|| "unknown error".to_string())).await?
            }
            FlowRunStatus::Stopped => self.executions.mark_stopped(execution_id).await?,
        }
        Ok(())
    }

    /// Enqueue one child execution per emitted event, checking the
    /// configured depth cap first (`SPEC_FULL.md` §4.5).
    async fn spawn_children(
        &self,
        parent_execution_id: Uuid,
        flow: &Flow,
        root_execution_id: Uuid,
        parent_depth: u32,
        emitted: &[EmittedChildEvent],
    ) -> Result<Vec<Uuid>, ChaingraphError> {
        let child_depth = parent_depth + 1;
        if !emitted.is_empty() && child_depth > self.config.max_execution_depth {
            return Err(ChaingraphError::DepthExceeded { depth: child_depth, max: self.config.max_execution_depth });
        }

        let mut child_ids = Vec::with_capacity(emitted.len());
        for event in emitted {
            let child_id = Uuid::now_v7();
            self.executions
                .create(NewExecution {
                    id: child_id,
                    flow_id: flow.id,
                    owner_id: None,
                    debug: false,
                    root_execution_id,
                    parent_execution_id: Some(parent_execution_id),
                    execution_depth: child_depth,
                    integration_context: serde_json::json!({}),
                    event_data: Some(TriggerEventData {
                        event_name: event.event_name.clone(),
                        payload: event.payload.clone(),
                    }),
                })
                .await?;

            self.tasks
                .enqueue(TaskDefinition {
                    execution_id: child_id,
                    flow_id: flow.id,
                    root_execution_id,
                    parent_execution_id: Some(parent_execution_id),
                    depth: child_depth,
                    input: event.payload.clone(),
                    priority: 0,
                    app_version: self.config.app_version.clone(),
                })
                .await?;

            self.signals.send(child_id, Signal::StartSignal).await?;
            child_ids.push(child_id);
            info!(%parent_execution_id, %child_id, event_name = %event.event_name, "spawned child execution");
        }
        Ok(child_ids)
    }

    /// Poll child executions until every one reaches a terminal status,
    /// then fold their outcomes into this execution's final status per
    /// `flow.strict_child_failure`.
    async fn await_and_fold_children(
        &self,
        execution_id: Uuid,
        own_status: FlowRunStatus,
        child_ids: &[Uuid],
        flow: &Flow,
    ) -> Result<FlowRunStatus, ChaingraphError> {
        if own_status != FlowRunStatus::Completed || child_ids.is_empty() {
            return Ok(own_status);
        }

        let mut any_child_failed = false;
        for child_id in child_ids {
            loop {
                let status = self.executions.get_status(*child_id).await?;
                if status.is_terminal() {
                    if matches!(status, ExecutionStatus::Failed) {
                        any_child_failed = true;
                    }
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }

        if any_child_failed && flow.strict_child_failure {
            warn!(%execution_id, "a child execution failed under strict_child_failure, failing parent");
            Ok(FlowRunStatus::Failed)
        } else {
            Ok(FlowRunStatus::Completed)
        }
    }
}

/// Background loop: translate pending [`DebugCommand`] signals into
/// [`CommandController`]/[`AbortController`] state until the execution
/// finishes. Grounded on the teacher's `WorkerPool` shutdown-signal loop
/// (`crates/durable/src/worker/pool.rs`), generalized from a single
/// shutdown flag to the four-command debug protocol.
async fn poll_debug_commands(
    signals: Arc<dyn SignalStore>,
    execution_id: Uuid,
    abort: AbortController,
    commands: Arc<CommandController>,
    mut stop: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Ok(pending) = signals.pending(execution_id).await else { continue };
                let mut processed = Vec::new();
                for p in pending {
                    if let Signal::Debug(cmd) = p.signal {
                        commands.apply(cmd);
                        if cmd == DebugCommand::Stop {
                            abort.abort();
                        }
                        processed.push(p.id);
                    }
                }
                if !processed.is_empty() {
                    let _ = signals.mark_processed(&processed).await;
                }
            }
            _ = stop.changed() => break,
        }
    }
}

/// Background loop: a child execution polls its parent's status every
/// `interval` and triggers `abort` the moment the parent reaches any
/// terminal status (`SPEC_FULL.md` §4.6 "Parent monitoring", state-machine
/// row `any | parent workflow terminal (for child) | stopping | abort`).
/// Grounded the same way as `await_and_fold_children`'s terminal-status
/// polling loop, applied to the parent instead of to this execution's own
/// children.
async fn poll_parent_status(
    executions: Arc<dyn ExecutionStore>,
    parent_execution_id: Uuid,
    abort: AbortController,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match executions.get_status(parent_execution_id).await {
                    Ok(status) if status.is_terminal() => {
                        warn!(%parent_execution_id, ?status, "parent execution reached a terminal status, aborting child");
                        abort.abort();
                        break;
                    }
                    _ => {}
                }
            }
            _ = stop.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::memory::InMemoryExecutionStore;
    use crate::orchestrator::store::test_execution;

    #[tokio::test]
    async fn poll_parent_status_aborts_once_parent_is_terminal() {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let parent = test_execution(0, None);
        let parent_id = parent.id;
        store.create(parent).await.unwrap();
        store.mark_running(parent_id).await.unwrap();

        let abort = AbortController::new();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_parent_status(
            store.clone(),
            parent_id,
            abort.clone(),
            Duration::from_millis(10),
            stop_rx,
        ));

        // The parent hasn't terminated yet; abort must not fire.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!abort.is_aborted());

        store.mark_completed(parent_id).await.unwrap();
        handle.await.unwrap();
        assert!(abort.is_aborted());
    }

    #[tokio::test]
    async fn poll_parent_status_stops_without_aborting_when_told_to_stop() {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let parent = test_execution(0, None);
        let parent_id = parent.id;
        store.create(parent).await.unwrap();
        store.mark_running(parent_id).await.unwrap();

        let abort = AbortController::new();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_parent_status(
            store.clone(),
            parent_id,
            abort.clone(),
            Duration::from_millis(10),
            stop_rx,
        ));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(!abort.is_aborted());
    }
}
