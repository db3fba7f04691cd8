//! Engine scheduling benchmark: run a chain of N nodes end to end and
//! measure total wall time, at a few chain lengths and fan-out-free shapes.
//!
//! Grounded on the teacher's `engine_scheduling`-equivalent intent
//! (the `task_claiming` harness style in `crates/durable/benches/`), applied
//! to `ExecutionEngine::execute` rather than raw task claiming.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chaingraph_core::engine::{
    AbortController, CommandController, EngineConfig, EventSink, ExecutionEngine, ExecutionEvent, NodeExecutionContext,
};
use chaingraph_core::graph::{Edge, Flow, Node, NodeEntry, NodeOutcome, NodeRegistry, Port, PortConfig, PortDirection};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: ExecutionEvent) {}
}

struct RelayNode {
    ports: Vec<Port>,
}

#[async_trait]
impl Node for RelayNode {
    const TYPE: &'static str = "relay";

    fn from_config(_config: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(Self {
            ports: vec![
                Port::new("input", PortDirection::Input, PortConfig::Number { min: None, max: None, step: None }),
                Port::new("output", PortDirection::Output, PortConfig::Number { min: None, max: None, step: None }),
            ],
        })
    }

    fn ports(&self) -> &[Port] {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut [Port] {
        &mut self.ports
    }

    async fn execute(&mut self, _ctx: &NodeExecutionContext) -> NodeOutcome {
        let input = self.ports[0].get_value().and_then(|v| v.as_i64()).unwrap_or(0);
        self.ports[1].set_value(serde_json::json!(input + 1));
        NodeOutcome::completed()
    }
}

fn chain_flow(length: usize) -> Flow {
    let mut nodes = Vec::with_capacity(length);
    let mut edges = Vec::with_capacity(length.saturating_sub(1));
    for i in 0..length {
        nodes.push(NodeEntry {
            id: format!("n{i}"),
            node_type: "relay".to_string(),
            config: serde_json::json!({}),
            metadata: Default::default(),
            breakpoint: false,
        });
        if i > 0 {
            edges.push(Edge {
                id: format!("e{i}"),
                source_node: format!("n{}", i - 1),
                source_port: "output".to_string(),
                target_node: format!("n{i}"),
                target_port: "input".to_string(),
                active: true,
            });
        }
    }
    Flow { id: uuid::Uuid::now_v7(), name: "chain".to_string(), description: None, nodes, edges, strict_child_failure: false }
}

fn bench_linear_chain(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let registry = Arc::new({
        let mut r = NodeRegistry::new();
        r.register::<RelayNode>();
        r
    });

    let mut group = c.benchmark_group("engine_scheduling/linear_chain");
    for length in [10, 100, 500] {
        group.throughput(Throughput::Elements(length as u64));
        let registry = registry.clone();
        group.bench_with_input(BenchmarkId::new("nodes", length), &length, |b, &length| {
            let registry = registry.clone();
            b.to_async(&rt).iter_custom(move |iters| {
                let registry = registry.clone();
                async move {
                    let flow = chain_flow(length);
                    let engine = ExecutionEngine::new(EngineConfig::default());
                    let sink = NullSink;

                    let start = Instant::now();
                    for _ in 0..iters {
                        let nodes = flow.instantiate_nodes(&registry).unwrap();
                        engine
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
                    }
                    start.elapsed()
                }
            });
        });
    }
    group.finish();
}

fn bench_parallel_width(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let registry = Arc::new({
        let mut r = NodeRegistry::new();
        r.register::<RelayNode>();
        r
    });

    let mut group = c.benchmark_group("engine_scheduling/parallel_width");
    for width in [4, 16, 64] {
        group.throughput(Throughput::Elements(width as u64));
        let registry = registry.clone();
        group.bench_with_input(BenchmarkId::new("max_parallel_nodes", width), &width, |b, &width| {
            let registry = registry.clone();
            b.to_async(&rt).iter_custom(move |iters| {
                let registry = registry.clone();
                async move {
                    let flow = chain_flow(width);
                    let engine = ExecutionEngine::new(EngineConfig { max_parallel_nodes: width });
                    let sink = NullSink;

                    let start = Instant::now();
                    for _ in 0..iters {
                        let nodes = flow.instantiate_nodes(&registry).unwrap();
                        engine
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
                    }
                    start.elapsed()
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_linear_chain, bench_parallel_width);
criterion_main!(benches);
