//! The execution engine's scheduling loop (component C3): ready-set
//! selection, bounded-parallel node dispatch, edge transfer, debug-command
//! honoring, and child-event collection.
//!
//! The in-flight-task bookkeeping is grounded on the teacher's `WorkerPool`
//! (`crates/durable/src/worker/pool.rs`): a `Semaphore` bounds concurrency,
//! each dispatched unit of work runs on its own `tokio::spawn`, and a
//! `watch`-backed signal (here `AbortController`) can cut a run short at any
//! await point.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::context::{AbortController, CommandController, DebugCommand, NodeExecutionContext};
use super::event::ExecutionEvent;
use crate::graph::{AnyNode, Flow, NodeStatus, PortDirection};

/// Tuning knobs for one engine run. Not the same as the queue's global/
/// per-worker concurrency (component C5) — this bounds how many node
/// bodies run concurrently *within a single execution*.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_parallel_nodes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_parallel_nodes: 8 }
    }
}

/// Terminal outcome of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowRunStatus {
    Completed,
    Failed,
    Stopped,
}

/// What `ExecutionEngine::execute` returns: the contract named in
/// `SPEC_FULL.md` §4.3 as `{status, duration, childTasks[]}`.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub status: FlowRunStatus,
    pub duration: Duration,
    pub child_tasks: Vec<super::context::EmittedChildEvent>,
    pub error: Option<String>,
}

/// Sink the engine emits lifecycle events to. The orchestrator supplies an
/// implementation backed by the durable event stream (component C4); tests
/// can use an in-memory `Vec`-backed sink.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ExecutionEvent);
}

/// Stateless driver; owns no per-run state itself so one instance can drive
/// many concurrent executions.
pub struct ExecutionEngine {
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Run `flow` to completion (or abort). `nodes` must already be
    /// instantiated (see `Flow::instantiate_nodes`) and keyed by node id.
    /// `trigger_event` is `Some((event_name, payload))` for a child
    /// execution spawned by an emitted event; `None` for a root execution.
    #[instrument(skip(self, flow, nodes, abort, commands, sink, trigger_event), fields(%execution_id))]
    pub async fn execute(
        &self,
        flow: &Flow,
        mut nodes: HashMap<String, Box<dyn AnyNode>>,
        execution_id: Uuid,
        abort: AbortController,
        commands: Arc<CommandController>,
        sink: &dyn EventSink,
        trigger_event: Option<(String, serde_json::Value)>,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let topo_order = match flow.validate() {
            Ok(order) => order,
            Err(e) => {
                return ExecutionOutcome {
                    status: FlowRunStatus::Failed,
                    duration: started.elapsed(),
                    child_tasks: vec![],
                    error: Some(e.to_string()),
                };
            }
        };
        let rank: HashMap<&str, usize> =
            topo_order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

        sink.emit(ExecutionEvent::FlowStarted).await;

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_nodes.max(1)));
        let mut ready: VecDeque<String> = VecDeque::new();
        let mut in_flight: tokio::task::JoinSet<(String, NodeRunResult)> =
            tokio::task::JoinSet::new();
        let mut child_tasks = Vec::new();
        let mut failure: Option<String> = None;
        let mut stopped = false;
        // Node ids that actually started (`NODE_STARTED` emitted). Nodes are
        // reinserted into `nodes` after they finish so downstream
        // propagation can still read their output ports, so membership in
        // `nodes` does NOT distinguish "ran" from "never reached" — this set
        // does (see `skip_remaining`).
        let mut executed: HashSet<String> = HashSet::new();

        self.seed_initial_ready(flow, &mut nodes, &trigger_event, &mut ready);

        'scheduling: loop {
            if abort.is_aborted() {
                stopped = true;
                break 'scheduling;
            }

            while commands.is_paused() && !commands.take_step() {
                if abort.is_aborted() {
                    stopped = true;
                    break 'scheduling;
                }
                if in_flight.is_empty() {
                    sink.emit(ExecutionEvent::FlowPaused).await;
                    tokio::select! {
                        _ = commands.wait_for_change() => {}
                        _ = abort.aborted() => { stopped = true; break 'scheduling; }
                    }
                    sink.emit(ExecutionEvent::FlowResumed).await;
                } else {
                    break;
                }
            }

            if ready.is_empty() && in_flight.is_empty() {
                break 'scheduling;
            }

            // Deterministic order: topological rank, then lexicographic.
            let mut batch: Vec<String> = ready.drain(..).collect();
            batch.sort_by_key(|id| (rank.get(id.as_str()).copied().unwrap_or(usize::MAX), id.clone()));

            for node_id in batch {
                if failure.is_some() && flow.nodes.iter().find(|n| n.id == node_id).map(|n| !n.breakpoint).unwrap_or(true) {
                    // fail-fast default: stop admitting new work once a
                    // required node has failed.
                    break;
                }
                let Some(mut node) = nodes.remove(&node_id) else { continue };
                let breakpoint = flow
                    .nodes
                    .iter()
                    .find(|n| n.id == node_id)
                    .map(|n| n.breakpoint)
                    .unwrap_or(false);

                sink.emit(ExecutionEvent::NodeStarted { node_id: node_id.clone() }).await;
                executed.insert(node_id.clone());
                if breakpoint {
                    sink.emit(ExecutionEvent::DebugBreakpointHit { node_id: node_id.clone() }).await;
                    commands.apply(DebugCommand::Pause);
                }

                let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
                let own_trigger = if node.listens_for_event().is_some() { trigger_event.clone() } else { None };
                let ctx = Arc::new(NodeExecutionContext::with_trigger_event(
                    execution_id,
                    node_id.clone(),
                    abort.clone(),
                    own_trigger,
                ));
                in_flight.spawn(async move {
                    let _permit = permit;
                    let outcome = node.execute(&ctx).await;
                    let emitted = ctx.take_emitted_events();
                    (node_id, NodeRunResult { node, outcome, emitted })
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                continue;
            };
            let (node_id, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "node task panicked");
                    continue;
                }
            };

            let NodeRunResult { node, outcome, emitted } = result;
            child_tasks.extend(emitted);
            nodes.insert(node_id.clone(), node);

            match outcome.status {
                NodeStatus::Completed => {
                    sink.emit(ExecutionEvent::NodeCompleted { node_id: node_id.clone() }).await;
                }
                NodeStatus::Failed => {
                    let message = outcome.error.unwrap_or_else(|| "node failed".to_string());
                    sink.emit(ExecutionEvent::NodeFailed {
                        node_id: node_id.clone(),
                        error: message.clone(),
                    })
                    .await;
                    let optional = nodes.get(&node_id).map(|n| n.optional()).unwrap_or(false);
                    if !optional {
                        failure = Some(message);
                    }
                }
                _ => {}
            }

            self.propagate_from_node(flow, &mut nodes, &node_id, &mut ready, sink).await;
        }

        if stopped {
            self.skip_remaining(flow, &executed, sink).await;
            sink.emit(ExecutionEvent::FlowCancelled { reason: "stopped".to_string() }).await;
            return ExecutionOutcome {
                status: FlowRunStatus::Stopped,
                duration: started.elapsed(),
                child_tasks,
                error: None,
            };
        }

        if let Some(message) = failure {
            self.skip_remaining(flow, &executed, sink).await;
            sink.emit(ExecutionEvent::FlowFailed { error: message.clone() }).await;
            return ExecutionOutcome {
                status: FlowRunStatus::Failed,
                duration: started.elapsed(),
                child_tasks,
                error: Some(message),
            };
        }

        // Anything never scheduled (disabled_auto_execution, no matching
        // trigger) is reported as skipped.
        self.skip_remaining(flow, &executed, sink).await;

        let duration = started.elapsed();
        sink.emit(ExecutionEvent::FlowCompleted { duration_ms: duration.as_millis() as u64 }).await;
        ExecutionOutcome {
            status: FlowRunStatus::Completed,
            duration,
            child_tasks,
            error: None,
        }
    }

    fn seed_initial_ready(
        &self,
        flow: &Flow,
        nodes: &mut HashMap<String, Box<dyn AnyNode>>,
        trigger_event: &Option<(String, serde_json::Value)>,
        ready: &mut VecDeque<String>,
    ) {
        for entry in &flow.nodes {
            let Some(node) = nodes.get_mut(&entry.id) else { continue };

            // Seed unconnected input ports with their default (or leave
            // unresolved-but-non-blocking if optional).
            let incoming: std::collections::HashSet<String> = flow
                .incoming_edges(&entry.id)
                .into_iter()
                .map(|e| e.target_port.clone())
                .collect();
            for port in node.ports_mut() {
                if port.direction == PortDirection::Input && !incoming.contains(&port.id) {
                    if let Some(default) = port.default_value.clone() {
                        port.set_value(default);
                        port.resolved = true;
                    } else if !port.required {
                        port.resolved = true;
                    }
                }
            }

            let is_listener = node.disabled_auto_execution();
            let eligible = if is_listener {
                false
            } else {
                flow.incoming_edges(&entry.id).is_empty() || all_inputs_resolved(node.as_ref())
            };

            if eligible {
                ready.push_back(entry.id.clone());
            }
        }

        if let Some((event_name, _payload)) = trigger_event {
            for entry in &flow.nodes {
                if let Some(node) = nodes.get(&entry.id) {
                    if node.disabled_auto_execution() && node_listens_for(node.as_ref(), event_name) {
                        ready.push_back(entry.id.clone());
                    }
                }
            }
        }
    }

    async fn propagate_from_node(
        &self,
        flow: &Flow,
        nodes: &mut HashMap<String, Box<dyn AnyNode>>,
        node_id: &str,
        ready: &mut VecDeque<String>,
        sink: &dyn EventSink,
    ) {
        let mut work: VecDeque<(String, String)> = VecDeque::new();

        if let Some(node) = nodes.get(node_id) {
            for port in node.ports() {
                if matches!(port.direction, PortDirection::Output | PortDirection::Passthrough)
                    && port.value.is_some()
                {
                    work.push_back((node_id.to_string(), port.id.clone()));
                }
            }
        }

        while let Some((src_node, src_port)) = work.pop_front() {
            let value = nodes
                .get(&src_node)
                .and_then(|n| n.ports().iter().find(|p| p.id == src_port))
                .and_then(|p| p.value.clone());
            let Some(value) = value else { continue };

            for edge in flow.outgoing_edges(&src_node, &src_port) {
                sink.emit(ExecutionEvent::EdgeTransferStarted {
                    edge_id: edge.id.clone(),
                    source_node: edge.source_node.clone(),
                    source_port: edge.source_port.clone(),
                    target_node: edge.target_node.clone(),
                    target_port: edge.target_port.clone(),
                })
                .await;

                let mut became_passthrough_source = false;
                if let Some(target) = nodes.get_mut(&edge.target_node) {
                    if let Some(port) = target.ports_mut().iter_mut().find(|p| p.id == edge.target_port) {
                        port.set_value(value.clone());
                        port.resolved = true;
                        if port.direction == PortDirection::Passthrough {
                            became_passthrough_source = true;
                        }
                    }
                }

                sink.emit(ExecutionEvent::EdgeTransferCompleted { edge_id: edge.id.clone() }).await;

                if became_passthrough_source {
                    work.push_back((edge.target_node.clone(), edge.target_port.clone()));
                    continue;
                }

                if let Some(target) = nodes.get(&edge.target_node) {
                    if !target.disabled_auto_execution()
                        && all_inputs_resolved(target.as_ref())
                        && !ready.contains(&edge.target_node)
                    {
                        ready.push_back(edge.target_node.clone());
                    }
                }
            }
        }
    }

    /// Emit `NODE_SKIPPED` for every node that never started (§4.3: nodes
    /// whose `disabledAutoExecution=true` and which were not reached by an
    /// event-listener path, or — on stop/failure — nodes that were still
    /// pending when the run ended). A node that started is reported via
    /// `NODE_COMPLETED`/`NODE_FAILED` instead, never `NODE_SKIPPED`, even
    /// though it is reinserted into `nodes` afterward so propagation can
    /// still read its output ports.
    async fn skip_remaining(&self, flow: &Flow, executed: &HashSet<String>, sink: &dyn EventSink) {
        for entry in &flow.nodes {
            if !executed.contains(&entry.id) {
                debug!(node_id = %entry.id, "marking node skipped");
                sink.emit(ExecutionEvent::NodeSkipped {
                    node_id: entry.id.clone(),
                    reason: "not reached".to_string(),
                })
                .await;
            }
        }
    }
}

struct NodeRunResult {
    node: Box<dyn AnyNode>,
    outcome: crate::graph::NodeOutcome,
    emitted: Vec<super::context::EmittedChildEvent>,
}

fn all_inputs_resolved(node: &dyn AnyNode) -> bool {
    node.ports()
        .iter()
        .filter(|p| p.direction == PortDirection::Input)
        .all(|p| p.resolved)
}

/// Admits a `disabled_auto_execution` node into a child execution's initial
/// ready set only when its configured `listens_for_event()` name matches the
/// event that spawned the child (invariant 6).
fn node_listens_for(node: &dyn AnyNode, event_name: &str) -> bool {
    node.disabled_auto_execution() && node.listens_for_event() == Some(event_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Flow, NodeEntry, Port, PortConfig, PortDirection};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        events: StdMutex<Vec<ExecutionEvent>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { events: StdMutex::new(Vec::new()) }
        }
        fn events(&self) -> Vec<ExecutionEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn emit(&self, event: ExecutionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct PassNode {
        ports: Vec<Port>,
        suffix: String,
    }

    #[async_trait]
    impl crate::graph::Node for PassNode {
        const TYPE: &'static str = "pass";

        fn from_config(config: serde_json::Value) -> Result<Self, serde_json::Error> {
            let suffix = config.get("suffix").and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(Self {
                ports: vec![
                    Port::new("input", PortDirection::Input, PortConfig::String { min_length: None, max_length: None, pattern: None }),
                    Port::new("output", PortDirection::Output, PortConfig::String { min_length: None, max_length: None, pattern: None }),
                ],
                suffix,
            })
        }

        fn ports(&self) -> &[Port] {
            &self.ports
        }

        fn ports_mut(&mut self) -> &mut [Port] {
            &mut self.ports
        }

        async fn execute(&mut self, _ctx: &NodeExecutionContext) -> crate::graph::NodeOutcome {
            let input = self.ports[0].get_value().and_then(|v| v.as_str()).unwrap_or("").to_string();
            self.ports[1].set_value(serde_json::json!(format!("{input}{}", self.suffix)));
            crate::graph::NodeOutcome::completed()
        }
    }

    fn linear_flow() -> (Flow, HashMap<String, Box<dyn AnyNode>>) {
        let mut registry = crate::graph::NodeRegistry::new();
        registry.register::<PassNode>();

        let flow = Flow {
            id: uuid::Uuid::now_v7(),
            name: "linear".to_string(),
            description: None,
            nodes: vec![
                NodeEntry {
                    id: "a".to_string(),
                    node_type: "pass".to_string(),
                    config: serde_json::json!({ "suffix": "hello " }),
                    metadata: Default::default(),
                    breakpoint: false,
                },
                NodeEntry {
                    id: "b".to_string(),
                    node_type: "pass".to_string(),
                    config: serde_json::json!({ "suffix": "world" }),
                    metadata: Default::default(),
                    breakpoint: false,
                },
            ],
            edges: vec![Edge {
                id: "e1".to_string(),
                source_node: "a".to_string(),
                source_port: "output".to_string(),
                target_node: "b".to_string(),
                target_port: "input".to_string(),
                active: true,
            }],
            strict_child_failure: false,
        };
        let nodes = flow.instantiate_nodes(&registry).unwrap();
        (flow, nodes)
    }

    #[tokio::test]
    async fn linear_flow_completes_and_transfers_values() {
        let (flow, nodes) = linear_flow();
        let engine = ExecutionEngine::new(EngineConfig::default());
        let sink = RecordingSink::new();

        let outcome = engine
            .execute(
                &flow,
                nodes,
                uuid::Uuid::now_v7(),
                AbortController::new(),
                Arc::new(CommandController::new()),
                &sink,
                None,
            )
            .await;

        assert_eq!(outcome.status, FlowRunStatus::Completed);
        let events = sink.events();
        assert!(matches!(events.first(), Some(ExecutionEvent::FlowStarted)));
        assert!(matches!(events.last(), Some(ExecutionEvent::FlowCompleted { .. })));
        assert!(events.iter().any(|e| matches!(e, ExecutionEvent::NodeCompleted { node_id } if node_id == "a")));
        assert!(events.iter().any(|e| matches!(e, ExecutionEvent::NodeCompleted { node_id } if node_id == "b")));
        // Every node in this flow ran, so none of them should be reported
        // skipped (`SPEC_FULL.md` §8 scenario 1's exact event stream has no
        // `NODE_SKIPPED`) even though both are reinserted into the engine's
        // node map after they finish so propagation can read their outputs.
        assert!(!events.iter().any(|e| matches!(e, ExecutionEvent::NodeSkipped { .. })));

        let started_a = events.iter().position(|e| matches!(e, ExecutionEvent::NodeStarted { node_id } if node_id == "a")).unwrap();
        let started_b = events.iter().position(|e| matches!(e, ExecutionEvent::NodeStarted { node_id } if node_id == "b")).unwrap();
        assert!(started_a < started_b, "a must start before b since b depends on a's output");
    }

    struct FailingNode {
        ports: Vec<Port>,
    }

    #[async_trait]
    impl crate::graph::Node for FailingNode {
        const TYPE: &'static str = "failing";

        fn from_config(_config: serde_json::Value) -> Result<Self, serde_json::Error> {
            Ok(Self { ports: vec![] })
        }

        fn ports(&self) -> &[Port] {
            &self.ports
        }

        fn ports_mut(&mut self) -> &mut [Port] {
            &mut self.ports
        }

        async fn execute(&mut self, _ctx: &NodeExecutionContext) -> crate::graph::NodeOutcome {
            crate::graph::NodeOutcome::failed("boom")
        }
    }

    #[tokio::test]
    async fn failing_node_fails_the_flow() {
        let mut registry = crate::graph::NodeRegistry::new();
        registry.register::<FailingNode>();

        let flow = Flow {
            id: uuid::Uuid::now_v7(),
            name: "fails".to_string(),
            description: None,
            nodes: vec![NodeEntry {
                id: "x".to_string(),
                node_type: "failing".to_string(),
                config: serde_json::Value::Null,
                metadata: Default::default(),
                breakpoint: false,
            }],
            edges: vec![],
            strict_child_failure: false,
        };
        let nodes = flow.instantiate_nodes(&registry).unwrap();
        let engine = ExecutionEngine::new(EngineConfig::default());
        let sink = RecordingSink::new();

        let outcome = engine
            .execute(
                &flow,
                nodes,
                uuid::Uuid::now_v7(),
                AbortController::new(),
                Arc::new(CommandController::new()),
                &sink,
                None,
            )
            .await;

        assert_eq!(outcome.status, FlowRunStatus::Failed);
        assert!(sink.events().iter().any(|e| matches!(e, ExecutionEvent::FlowFailed { .. })));
    }

    struct ListenerNode {
        ports: Vec<Port>,
        event_name: String,
    }

    #[async_trait]
    impl crate::graph::Node for ListenerNode {
        const TYPE: &'static str = "listener";

        fn from_config(config: serde_json::Value) -> Result<Self, serde_json::Error> {
            let event_name =
                config.get("eventName").and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(Self {
                ports: vec![Port::new(
                    "payload",
                    PortDirection::Output,
                    PortConfig::Any { underlying_type: None },
                )],
                event_name,
            })
        }

        fn ports(&self) -> &[Port] {
            &self.ports
        }

        fn ports_mut(&mut self) -> &mut [Port] {
            &mut self.ports
        }

        fn disabled_auto_execution(&self) -> bool {
            true
        }

        fn listens_for_event(&self) -> Option<&str> {
            Some(&self.event_name)
        }

        async fn execute(&mut self, ctx: &NodeExecutionContext) -> crate::graph::NodeOutcome {
            let (_name, payload) = ctx.trigger_event().expect("listener runs only with a matching trigger");
            self.ports[0].set_value(payload.clone());
            crate::graph::NodeOutcome::completed()
        }
    }

    #[tokio::test]
    async fn listener_node_skipped_without_matching_trigger_but_runs_in_child() {
        let mut registry = crate::graph::NodeRegistry::new();
        registry.register::<ListenerNode>();

        let flow = Flow {
            id: uuid::Uuid::now_v7(),
            name: "emitter-listener".to_string(),
            description: None,
            nodes: vec![NodeEntry {
                id: "listener".to_string(),
                node_type: "listener".to_string(),
                config: serde_json::json!({ "eventName": "e1" }),
                metadata: Default::default(),
                breakpoint: false,
            }],
            edges: vec![],
            strict_child_failure: false,
        };

        // Parent/root execution: no trigger event, so the listener is
        // never admitted and is reported skipped (invariant 6).
        let nodes = flow.instantiate_nodes(&registry).unwrap();
        let engine = ExecutionEngine::new(EngineConfig::default());
        let sink = RecordingSink::new();
        let outcome = engine
            .execute(&flow, nodes, uuid::Uuid::now_v7(), AbortController::new(), Arc::new(CommandController::new()), &sink, None)
            .await;
        assert_eq!(outcome.status, FlowRunStatus::Completed);
        assert!(sink.events().iter().any(|e| matches!(e, ExecutionEvent::NodeSkipped { node_id } if node_id == "listener")));
        assert!(!sink.events().iter().any(|e| matches!(e, ExecutionEvent::NodeStarted { node_id } if node_id == "listener")));

        // Child execution triggered by a matching event: the listener runs
        // and its output port resolves to the event payload.
        let nodes = flow.instantiate_nodes(&registry).unwrap();
        let sink = RecordingSink::new();
        let outcome = engine
            .execute(
                &flow,
                nodes,
                uuid::Uuid::now_v7(),
                AbortController::new(),
                Arc::new(CommandController::new()),
                &sink,
                Some(("e1".to_string(), serde_json::json!({"x": 42}))),
            )
            .await;
        assert_eq!(outcome.status, FlowRunStatus::Completed);
        assert!(sink.events().iter().any(|e| matches!(e, ExecutionEvent::NodeCompleted { node_id } if node_id == "listener")));

        // A non-matching event name still leaves the listener unreached.
        let nodes = flow.instantiate_nodes(&registry).unwrap();
        let sink = RecordingSink::new();
        let outcome = engine
            .execute(
                &flow,
                nodes,
                uuid::Uuid::now_v7(),
                AbortController::new(),
                Arc::new(CommandController::new()),
                &sink,
                Some(("other-event".to_string(), serde_json::json!(null))),
            )
            .await;
        assert_eq!(outcome.status, FlowRunStatus::Completed);
        assert!(!sink.events().iter().any(|e| matches!(e, ExecutionEvent::NodeStarted { node_id } if node_id == "listener")));
    }
}
