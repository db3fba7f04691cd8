//! Flow lookup for claimed tasks.
//!
//! Flow definitions are read-only during execution (§5) and their storage
//! is an embedding-application concern the core does not own (§6 lists
//! "persistent flow/node schema storage" as out of scope). A worker process
//! is handed one [`FlowProvider`] implementation by its host binary so it
//! can resolve a claimed task's `flow_id` into the [`Flow`] the orchestrator
//! needs to run — mirrors the teacher's own split between the durable
//! queue (which only ever stores opaque task payloads) and the workflow
//! registry that resolves a task's named function
//! (`crates/durable/src/worker/pool.rs`'s `ActivityHandler` map).

use async_trait::async_trait;
use chaingraph_core::graph::Flow;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FlowLookupError {
    #[error("flow {0} not found")]
    NotFound(Uuid),
    #[error("flow lookup failed: {0}")]
    Backend(String),
}

/// Resolves a `flow_id` to the [`Flow`] definition a claimed task should
/// run. Implemented by the embedding application against whatever store it
/// keeps flow definitions in (a database table, a file, an in-memory map).
#[async_trait]
pub trait FlowProvider: Send + Sync {
    async fn get_flow(&self, flow_id: Uuid) -> Result<Flow, FlowLookupError>;
}

/// A [`FlowProvider`] backed by a fixed in-memory set of flows, useful for
/// tests and single-tenant deployments where flows are loaded once at
/// startup rather than looked up per task.
pub struct StaticFlowProvider {
    flows: std::collections::HashMap<Uuid, Flow>,
}

impl StaticFlowProvider {
    pub fn new(flows: impl IntoIterator<Item = Flow>) -> Self {
        Self { flows: flows.into_iter().map(|f| (f.id, f)).collect() }
    }
}

#[async_trait]
impl FlowProvider for StaticFlowProvider {
    async fn get_flow(&self, flow_id: Uuid) -> Result<Flow, FlowLookupError> {
        self.flows.get(&flow_id).cloned().ok_or(FlowLookupError::NotFound(flow_id))
    }
}
