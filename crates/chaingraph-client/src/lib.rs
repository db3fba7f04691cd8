//! Producer-only client (component C8): enqueue executions and observe
//! their progress without initializing any dequeue machinery.
//!
//! Grounded on the asymmetry already present in the teacher's
//! `WorkflowEventStore` trait (`crates/durable/src/persistence/store.rs`):
//! a full worker needs claim/heartbeat/reclaim, a pure submission path only
//! needs `create`/`enqueue`/`send_signal`/`get_status`/`get_result`. This
//! crate exposes exactly that subset, wrapped in one client type so an API
//! server can depend on it without pulling in `chaingraph-worker`'s poll
//! loop.

use std::sync::Arc;

use chaingraph_core::engine::DebugCommand;
use chaingraph_core::orchestrator::{
    ExecutionRow, ExecutionStatus, ExecutionStore, IntegrationContext, NewExecution, Signal, SignalStore,
};
use chaingraph_core::queue::{TaskDefinition, TaskQueue};
use chaingraph_core::stream::EventStream;
use chaingraph_core::ChaingraphError;
use uuid::Uuid;

/// What the caller supplies to start a new root execution. Child
/// executions are spawned internally by the orchestrator (§4.6), never
/// through this client.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub flow_id: Uuid,
    pub owner_id: Option<String>,
    pub debug: bool,
    pub integration_context: IntegrationContext,
    pub input: serde_json::Value,
    pub priority: i32,
}

impl Default for SubmitRequest {
    fn default() -> Self {
        Self {
            flow_id: Uuid::nil(),
            owner_id: None,
            debug: false,
            integration_context: serde_json::json!({}),
            input: serde_json::json!({}),
            priority: 0,
        }
    }
}

/// The terminal outcome `getResult` resolves with once the execution
/// reaches a `FLOW_*` terminal event: the final status plus the error
/// message if it failed or was cancelled (§7, "Client side: `getResult`
/// rejects with the terminal error message or resolves with the final
/// output").
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

/// Producer-facing view of the durable store: enqueue work and read back
/// status, without the claim/heartbeat/reclaim surface a worker needs.
pub struct ChaingraphClient {
    app_version: String,
    executions: Arc<dyn ExecutionStore>,
    tasks: Arc<dyn TaskQueue>,
    stream: Arc<dyn EventStream>,
    signals: Arc<dyn SignalStore>,
}

impl ChaingraphClient {
    pub fn new(
        app_version: impl Into<String>,
        executions: Arc<dyn ExecutionStore>,
        tasks: Arc<dyn TaskQueue>,
        stream: Arc<dyn EventStream>,
        signals: Arc<dyn SignalStore>,
    ) -> Self {
        Self { app_version: app_version.into(), executions, tasks, stream, signals }
    }

    /// Create the execution row and enqueue its task. Returns the new
    /// execution's id. The worker that eventually claims this task must be
    /// running the same `app_version` this client was built with, or the
    /// task is never dequeued (§6, §7 `VersionMismatch`) — enforced by the
    /// worker at claim/run time, not here, since this client never talks to
    /// a worker directly.
    pub async fn enqueue(&self, request: SubmitRequest) -> Result<Uuid, ChaingraphError> {
        let execution_id = Uuid::now_v7();

        self.executions
            .create(NewExecution {
                id: execution_id,
                flow_id: request.flow_id,
                owner_id: request.owner_id,
                debug: request.debug,
                root_execution_id: execution_id,
                parent_execution_id: None,
                execution_depth: 0,
                integration_context: request.integration_context,
                event_data: None,
            })
            .await?;

        self.tasks
            .enqueue(TaskDefinition {
                execution_id,
                flow_id: request.flow_id,
                root_execution_id: execution_id,
                parent_execution_id: None,
                depth: 0,
                input: request.input,
                priority: request.priority,
                app_version: self.app_version.clone(),
            })
            .await?;

        Ok(execution_id)
    }

    /// Deliver `START_SIGNAL` to a root execution once the caller is ready
    /// for it to begin (it is already claimable the moment it is enqueued,
    /// but the orchestrator will not run the engine until this arrives).
    pub async fn start(&self, execution_id: Uuid) -> Result<(), ChaingraphError> {
        self.signals.send(execution_id, Signal::StartSignal).await?;
        Ok(())
    }

    pub async fn send_signal(&self, execution_id: Uuid, command: DebugCommand) -> Result<(), ChaingraphError> {
        self.signals.send(execution_id, Signal::Debug(command)).await?;
        Ok(())
    }

    /// Request cancellation; the orchestrator observes `DebugCommand::Stop`
    /// at its next poll and aborts the running engine (§5, "Cancellation").
    pub async fn cancel(&self, execution_id: Uuid) -> Result<(), ChaingraphError> {
        self.send_signal(execution_id, DebugCommand::Stop).await
    }

    pub async fn get_status(&self, execution_id: Uuid) -> Result<ExecutionStatus, ChaingraphError> {
        Ok(self.executions.get_status(execution_id).await?)
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<ExecutionRow, ChaingraphError> {
        Ok(self.executions.get(execution_id).await?)
    }

    /// Resolve once the execution's status becomes terminal, returning its
    /// outcome. Reads the durable row rather than polling the event stream
    /// directly, so it works the same whether or not a subscriber happened
    /// to be attached when the terminal event was written.
    pub async fn get_result(&self, execution_id: Uuid) -> Result<ExecutionResult, ChaingraphError> {
        loop {
            let row = self.executions.get(execution_id).await?;
            if row.status.is_terminal() {
                return Ok(ExecutionResult { status: row.status, error: row.error_message });
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }

    /// Subscribe to this execution's live event stream from `from_index`
    /// onward; terminates once the engine writes a `FLOW_*` terminal event
    /// (§6, "Subscriber API").
    pub async fn subscribe(
        &self,
        execution_id: Uuid,
        from_index: i64,
    ) -> Result<tokio::sync::mpsc::Receiver<chaingraph_core::stream::StreamRecord>, ChaingraphError> {
        Ok(self.stream.subscribe(execution_id, from_index).await?)
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaingraph_core::orchestrator::{InMemoryExecutionStore, InMemorySignalStore};
    use chaingraph_core::queue::InMemoryTaskQueue;
    use chaingraph_core::stream::InMemoryEventStream;

    fn client() -> ChaingraphClient {
        ChaingraphClient::new(
            "test",
            Arc::new(InMemoryExecutionStore::new()),
            Arc::new(InMemoryTaskQueue::new()),
            Arc::new(InMemoryEventStream::new()),
            Arc::new(InMemorySignalStore::new()),
        )
    }

    #[tokio::test]
    async fn enqueue_creates_a_claimable_root_task() {
        let client = client();
        let flow_id = Uuid::now_v7();
        let execution_id = client
            .enqueue(SubmitRequest { flow_id, ..Default::default() })
            .await
            .unwrap();

        let status = client.get_status(execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Created);

        let claimed = client.tasks.claim("worker-1", "test", 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].definition.execution_id, execution_id);
        assert_eq!(claimed[0].definition.flow_id, flow_id);
    }

    #[tokio::test]
    async fn get_result_resolves_once_status_is_terminal() {
        let client = client();
        let execution_id = client.enqueue(SubmitRequest::default()).await.unwrap();

        let executions = client.executions.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            executions.mark_running(execution_id).await.unwrap();
            executions.mark_completed(execution_id).await.unwrap();
        });

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), client.get_result(execution_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn cancel_delivers_a_stop_debug_command() {
        let client = client();
        let execution_id = client.enqueue(SubmitRequest::default()).await.unwrap();
        client.cancel(execution_id).await.unwrap();

        let pending = client.signals.pending(execution_id).await.unwrap();
        assert!(matches!(pending.last().unwrap().signal, Signal::Debug(DebugCommand::Stop)));
    }
}
