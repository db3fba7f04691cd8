//! Node types: the contract every executable graph vertex fulfils, plus the
//! type-tag registry used to instantiate nodes from a serialized flow.
//!
//! Grounded on the teacher's `WorkflowRegistry` / `AnyWorkflow` split
//! (`crates/durable/src/engine/registry.rs`): a typed trait for authors to
//! implement, a type-erased wrapper the engine drives, and a `HashMap<String,
//! Factory>` keyed by a stable type tag. Here the tag is the node type
//! instead of the workflow type, and instantiation happens at flow-load time
//! rather than at workflow-start time.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::port::Port;
use crate::engine::context::NodeExecutionContext;

/// Runtime status of a node within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Initialized,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Author-facing, UI-facing metadata. Carried on the node but never
/// consulted by the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub ui: serde_json::Value,
}

/// The outcome of one node's `execute` call.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    pub status: NodeStatus,
    pub error: Option<String>,
}

impl NodeOutcome {
    pub fn completed() -> Self {
        Self { status: NodeStatus::Completed, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { status: NodeStatus::Failed, error: Some(message.into()) }
    }
}

/// A node-scoped event delivered to `on_event`, e.g. a debug toggle or an
/// upstream edge retraction. Distinct from the execution-wide lifecycle
/// events in [`crate::engine::event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEvent {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// The typed, author-facing node trait.
///
/// Implementors own no mutable graph topology — only their own ports and
/// whatever internal state `execute` needs. The engine calls `execute`
/// exactly once per execution unless the node is skipped; every output or
/// passthrough port holding a value when `execute` returns is delivered to
/// its connected targets (streamed/partial mid-execution resolution is not
/// supported by this engine's one-future-per-node scheduling model).
#[async_trait]
pub trait Node: Send + Sync {
    /// Stable type tag, used as the registry key and in serialized flows.
    const TYPE: &'static str
    where
        Self: Sized;

    /// Construct a fresh per-execution instance from a serialized config.
    fn from_config(config: serde_json::Value) -> Result<Self, serde_json::Error>
    where
        Self: Sized;

    /// The node's declared ports, in a stable order.
    fn ports(&self) -> &[Port];

    fn ports_mut(&mut self) -> &mut [Port];

    /// Whether this node must be reached via an event-listener child
    /// execution rather than run automatically in the parent flow.
    fn disabled_auto_execution(&self) -> bool {
        false
    }

    /// For an event-listener node (`disabled_auto_execution() == true`),
    /// the event name it is configured to listen for. The scheduler admits
    /// the node into a child execution's initial ready set only when this
    /// matches the event that spawned the child (invariant 6). Nodes that
    /// are not listeners return `None`.
    fn listens_for_event(&self) -> Option<&str> {
        None
    }

    /// Whether this node's own failure is allowed to not fail the flow.
    fn optional(&self) -> bool {
        false
    }

    async fn execute(&mut self, ctx: &NodeExecutionContext) -> NodeOutcome;

    fn on_event(&mut self, _event: &NodeEvent) {}
}

/// Type-erased node interface the engine actually drives. Parallels
/// `AnyWorkflow` in the teacher's registry module.
#[async_trait]
pub trait AnyNode: Send + Sync {
    fn node_type(&self) -> &'static str;
    fn ports(&self) -> &[Port];
    fn ports_mut(&mut self) -> &mut [Port];
    fn disabled_auto_execution(&self) -> bool;
    fn optional(&self) -> bool;
    fn listens_for_event(&self) -> Option<&str>;
    async fn execute(&mut self, ctx: &NodeExecutionContext) -> NodeOutcome;
    fn on_event(&mut self, event: &NodeEvent);
}

struct NodeWrapper<N: Node> {
    inner: N,
}

#[async_trait]
impl<N: Node> AnyNode for NodeWrapper<N> {
    fn node_type(&self) -> &'static str {
        N::TYPE
    }

    fn ports(&self) -> &[Port] {
        self.inner.ports()
    }

    fn ports_mut(&mut self) -> &mut [Port] {
        self.inner.ports_mut()
    }

    fn disabled_auto_execution(&self) -> bool {
        self.inner.disabled_auto_execution()
    }

    fn optional(&self) -> bool {
        self.inner.optional()
    }

    fn listens_for_event(&self) -> Option<&str> {
        self.inner.listens_for_event()
    }

    async fn execute(&mut self, ctx: &NodeExecutionContext) -> NodeOutcome {
        self.inner.execute(ctx).await
    }

    fn on_event(&mut self, event: &NodeEvent) {
        self.inner.on_event(event)
    }
}

type NodeFactory =
    Box<dyn Fn(serde_json::Value) -> Result<Box<dyn AnyNode>, serde_json::Error> + Send + Sync>;

/// Maps node-type tags to factories, used when deserializing a flow
/// ([`crate::graph::flow::Flow::deserialize`]) and when the engine
/// instantiates a node's per-execution runtime state.
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    pub fn register<N: Node + 'static>(&mut self) {
        let factory: NodeFactory = Box::new(|config: serde_json::Value| {
            let node = N::from_config(config)?;
            Ok(Box::new(NodeWrapper { inner: node }) as Box<dyn AnyNode>)
        });
        self.factories.insert(N::TYPE.to_string(), factory);
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    pub fn create(
        &self,
        node_type: &str,
        config: serde_json::Value,
    ) -> Result<Box<dyn AnyNode>, NodeRegistryError> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| NodeRegistryError::UnknownNodeType(node_type.to_string()))?;
        factory(config).map_err(NodeRegistryError::Deserialization)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("node_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeRegistryError {
    #[error("unknown node type: {0}")]
    UnknownNodeType(String),
    #[error("failed to deserialize node config: {0}")]
    Deserialization(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::port::{PortConfig, PortDirection};

    struct EchoNode {
        ports: Vec<Port>,
    }

    impl Node for EchoNode {
        const TYPE: &'static str = "echo";

        fn from_config(_config: serde_json::Value) -> Result<Self, serde_json::Error> {
            Ok(Self {
                ports: vec![
                    Port::new("input", PortDirection::Input, PortConfig::Any { underlying_type: None }),
                    Port::new("output", PortDirection::Output, PortConfig::Any { underlying_type: None }),
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
            let value = self.ports[0].get_value().cloned();
            if let Some(v) = value {
                self.ports[1].set_value(v);
            }
            NodeOutcome::completed()
        }
    }

    #[test]
    fn registry_round_trips_a_node_type() {
        let mut registry = NodeRegistry::new();
        registry.register::<EchoNode>();

        assert!(registry.contains("echo"));
        let node = registry.create("echo", serde_json::json!({})).unwrap();
        assert_eq!(node.node_type(), "echo");
        assert_eq!(node.ports().len(), 2);
    }

    #[test]
    fn unknown_node_type_is_an_error() {
        let registry = NodeRegistry::new();
        let result = registry.create("nope", serde_json::json!({}));
        assert!(matches!(result, Err(NodeRegistryError::UnknownNodeType(_))));
    }
}
