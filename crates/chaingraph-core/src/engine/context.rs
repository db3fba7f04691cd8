//! Per-execution and per-node execution context: abort/command control and
//! child-event emission.
//!
//! The abort/command handles are grounded on the teacher's `watch`-channel
//! shutdown signal in `WorkerPool` (`crates/durable/src/worker/pool.rs`,
//! `shutdown_tx`/`shutdown_rx`) and the cooperative-cancellation
//! `AtomicBool` handle in `ActivityContext`/`CancellationHandle`
//! (`crates/durable/src/activity/context.rs`).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

/// One of the four debug commands a running execution understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugCommand {
    Pause,
    Resume,
    Step,
    Stop,
}

/// Cooperative abort signal, one per execution. Triggered by a STOP
/// command, parent termination, process shutdown, or the hard task
/// deadline.
#[derive(Clone)]
pub struct AbortController {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `abort()` has been called.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared pause/step state the debug-command polling loop (orchestrator,
/// component C6) mutates and the engine's scheduler (component C3) consults
/// before popping each ready node.
pub struct CommandController {
    paused: Arc<Mutex<bool>>,
    step_budget: Arc<Mutex<u32>>,
    notify: Arc<tokio::sync::Notify>,
}

impl CommandController {
    pub fn new() -> Self {
        Self {
            paused: Arc::new(Mutex::new(false)),
            step_budget: Arc::new(Mutex::new(0)),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn apply(&self, command: DebugCommand) {
        match command {
            DebugCommand::Pause => *self.paused.lock() = true,
            DebugCommand::Resume => *self.paused.lock() = false,
            DebugCommand::Step => {
                *self.paused.lock() = true;
                *self.step_budget.lock() += 1;
            }
            DebugCommand::Stop => {
                // Handled by the orchestrator via AbortController; nothing
                // to track here besides unblocking a waiting scheduler.
            }
        }
        self.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Consume one unit of step budget if available, returning whether a
    /// single node may proceed despite the pause.
    pub fn take_step(&self) -> bool {
        let mut budget = self.step_budget.lock();
        if *budget > 0 {
            *budget -= 1;
            true
        } else {
            false
        }
    }

    pub async fn wait_for_change(&self) {
        self.notify.notified().await;
    }
}

impl Default for CommandController {
    fn default() -> Self {
        Self::new()
    }
}

/// A request, collected during the engine run, to spawn a child execution
/// in response to an emitted node event. The engine never enqueues these
/// itself — only the orchestrator, which owns the durable queue handle,
/// may do that (see `SPEC_FULL.md` §4.3).
#[derive(Debug, Clone, serde::Serialize)]
pub struct EmittedChildEvent {
    pub emitting_node_id: String,
    pub event_name: String,
    pub payload: serde_json::Value,
}

/// Shared sink for [`EmittedChildEvent`]s raised from within a node's
/// `execute`. Interior-mutable because `Node::execute` only borrows the
/// context immutably — mirroring the teacher's `ActivityContext::heartbeat`,
/// which sends on a channel through a shared `&self`.
pub struct NodeExecutionContext {
    pub execution_id: uuid::Uuid,
    pub node_id: String,
    pub abort: AbortController,
    /// `Some((eventName, payload))` when this node is running inside a
    /// child execution spawned by a matching emitted event (see
    /// `Node::listens_for_event`); `None` for every other node and for
    /// root executions.
    trigger_event: Option<(String, serde_json::Value)>,
    emitted_events: Mutex<Vec<EmittedChildEvent>>,
}

impl NodeExecutionContext {
    pub fn new(execution_id: uuid::Uuid, node_id: impl Into<String>, abort: AbortController) -> Self {
        Self::with_trigger_event(execution_id, node_id, abort, None)
    }

    pub fn with_trigger_event(
        execution_id: uuid::Uuid,
        node_id: impl Into<String>,
        abort: AbortController,
        trigger_event: Option<(String, serde_json::Value)>,
    ) -> Self {
        Self {
            execution_id,
            node_id: node_id.into(),
            abort,
            trigger_event,
            emitted_events: Mutex::new(Vec::new()),
        }
    }

    /// The event name and payload that spawned this child execution, for a
    /// listener node (`Node::listens_for_event`) to bind into its own input
    /// ports. `None` outside of a matching child execution.
    pub fn trigger_event(&self) -> Option<(&str, &serde_json::Value)> {
        self.trigger_event.as_ref().map(|(name, payload)| (name.as_str(), payload))
    }

    /// Request that a child execution be spawned once this node's
    /// `execute` returns, carrying `payload` as the triggering event data.
    pub fn emit_event(&self, event_name: impl Into<String>, payload: serde_json::Value) {
        self.emitted_events.lock().push(EmittedChildEvent {
            emitting_node_id: self.node_id.clone(),
            event_name: event_name.into(),
            payload,
        });
    }

    pub fn take_emitted_events(&self) -> Vec<EmittedChildEvent> {
        std::mem::take(&mut self.emitted_events.lock())
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn abort_controller_wakes_waiters() {
        let abort = AbortController::new();
        assert!(!abort.is_aborted());
        let waiter = abort.clone();
        let handle = tokio::spawn(async move {
            waiter.aborted().await;
        });
        abort.abort();
        handle.await.unwrap();
        assert!(abort.is_aborted());
    }

    #[test]
    fn command_controller_step_consumes_budget_once() {
        let cmd = CommandController::new();
        cmd.apply(DebugCommand::Step);
        assert!(cmd.is_paused());
        assert!(cmd.take_step());
        assert!(!cmd.take_step());
    }
}
