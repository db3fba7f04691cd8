//! Flow model: a set of nodes connected by edges, with validation and
//! (de)serialization.
//!
//! DAG validation (unique node ids, edge-endpoint existence, acyclicity via
//! Kahn's algorithm) is grounded on `dag.rs` in the automation-tool example
//! in the retrieval pack — the closest prior art in this corpus for a
//! graph-of-nodes model, which the primary teacher (`everruns-durable`)
//! doesn't have. The tagged-node/edge serialization shape otherwise follows
//! this crate's own port/event tagged-enum convention.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::node::{AnyNode, NodeRegistry};
use super::port::PortDirection;

/// A directed connection from a source port to a target port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source_node: String,
    pub source_port: String,
    pub target_node: String,
    pub target_port: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// A serialized node entry within a flow: identity plus a type tag the
/// [`NodeRegistry`] resolves at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: String,
    pub node_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub metadata: super::node::NodeMetadata,
    /// A node with a breakpoint set pauses the engine's scheduler
    /// immediately after its `NODE_STARTED` event, for interactive debug.
    #[serde(default)]
    pub breakpoint: bool,
}

/// Whether child executions triggered from this flow's event listeners
/// propagate a single failure to the parent, or are aggregated leniently.
/// Decided as an explicit per-flow flag (see the crate's `DESIGN.md` for the
/// open-question record); defaults to the source's own lenient default.
fn default_strict_child_failure() -> bool {
    false
}

/// A flow: nodes, edges, and metadata. Immutable once loaded by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: uuid::Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeEntry>,
    pub edges: Vec<Edge>,
    #[serde(default = "default_strict_child_failure")]
    pub strict_child_failure: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("invalid edge {edge_id}: {reason}")]
    InvalidEdge { edge_id: String, reason: String },

    #[error("unknown node type: {0}")]
    UnknownNodeType(String),
}

impl Flow {
    pub fn add_node(&mut self, node: NodeEntry) -> Result<(), FlowError> {
        if self.nodes.iter().any(|n| n.id == node.id) {
            return Err(FlowError::DuplicateNodeId(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn remove_node(&mut self, node_id: &str) {
        self.nodes.retain(|n| n.id != node_id);
        self.edges
            .retain(|e| e.source_node != node_id && e.target_node != node_id);
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<(), FlowError> {
        self.validate_edge(&edge)?;
        self.edges.push(edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, edge_id: &str) {
        self.edges.retain(|e| e.id != edge_id);
    }

    fn validate_edge(&self, edge: &Edge) -> Result<(), FlowError> {
        let source_exists = self.nodes.iter().any(|n| n.id == edge.source_node);
        let target_exists = self.nodes.iter().any(|n| n.id == edge.target_node);
        if !source_exists {
            return Err(FlowError::InvalidEdge {
                edge_id: edge.id.clone(),
                reason: format!("unknown source node {}", edge.source_node),
            });
        }
        if !target_exists {
            return Err(FlowError::InvalidEdge {
                edge_id: edge.id.clone(),
                reason: format!("unknown target node {}", edge.target_node),
            });
        }
        if edge.source_node == edge.target_node && edge.source_port == edge.target_port {
            return Err(FlowError::InvalidEdge {
                edge_id: edge.id.clone(),
                reason: "a port cannot connect to itself".to_string(),
            });
        }
        Ok(())
    }

    /// Validate node-id uniqueness, edge endpoints, and acyclicity; return
    /// nodes in topological order (ties broken lexicographically by id, so
    /// scheduling traces are deterministic across runs).
    pub fn validate(&self) -> Result<Vec<String>, FlowError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(FlowError::DuplicateNodeId(node.id.clone()));
            }
        }

        for edge in &self.edges {
            self.validate_edge(edge)?;
        }

        topological_order(&self.nodes, &self.edges)
    }

    pub fn serialize(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Deserialize a flow from JSON, checking every node's type tag against
    /// `registry` so an unresolvable node is rejected before the flow is
    /// ever handed to the engine, then validating structure and per-edge
    /// port compatibility.
    pub fn deserialize(json: serde_json::Value, registry: &NodeRegistry) -> Result<Self, FlowError> {
        let flow: Flow = serde_json::from_value(json).map_err(|e| FlowError::InvalidEdge {
            edge_id: "<parse>".to_string(),
            reason: e.to_string(),
        })?;

        for node in &flow.nodes {
            if !registry.contains(&node.node_type) {
                return Err(FlowError::UnknownNodeType(node.node_type.clone()));
            }
        }

        flow.validate_with_registry(registry)?;
        Ok(flow)
    }

    /// `validate()` plus per-edge port-direction and port-kind compatibility
    /// checks (§4.2: "validation fails with `InvalidEdge` if ... port kinds
    /// are incompatible"), which require instantiating nodes to inspect
    /// their declared ports.
    pub fn validate_with_registry(&self, registry: &NodeRegistry) -> Result<Vec<String>, FlowError> {
        let order = self.validate()?;
        let nodes = self.instantiate_nodes(registry)?;

        for edge in &self.edges {
            let source_port = nodes
                .get(&edge.source_node)
                .and_then(|n| n.ports().iter().find(|p| p.id == edge.source_port))
                .ok_or_else(|| FlowError::InvalidEdge {
                    edge_id: edge.id.clone(),
                    reason: format!("node {} has no port {}", edge.source_node, edge.source_port),
                })?;
            let target_port = nodes
                .get(&edge.target_node)
                .and_then(|n| n.ports().iter().find(|p| p.id == edge.target_port))
                .ok_or_else(|| FlowError::InvalidEdge {
                    edge_id: edge.id.clone(),
                    reason: format!("node {} has no port {}", edge.target_node, edge.target_port),
                })?;

            if !is_edge_source_direction(source_port.direction) {
                return Err(FlowError::InvalidEdge {
                    edge_id: edge.id.clone(),
                    reason: format!(
                        "source port {} is {:?}, not output/passthrough",
                        edge.source_port, source_port.direction
                    ),
                });
            }
            if !is_edge_target_direction(target_port.direction) {
                return Err(FlowError::InvalidEdge {
                    edge_id: edge.id.clone(),
                    reason: format!(
                        "target port {} is {:?}, not input/passthrough",
                        edge.target_port, target_port.direction
                    ),
                });
            }
            if !source_port.config.is_compatible_with(&target_port.config) {
                return Err(FlowError::InvalidEdge {
                    edge_id: edge.id.clone(),
                    reason: format!(
                        "incompatible port kinds: {:?} -> {:?}",
                        source_port.config.kind(),
                        target_port.config.kind()
                    ),
                });
            }
        }

        Ok(order)
    }

    /// Instantiate every node entry into a runtime [`AnyNode`], keyed by
    /// node id, ready for the engine to schedule.
    pub fn instantiate_nodes(
        &self,
        registry: &NodeRegistry,
    ) -> Result<HashMap<String, Box<dyn AnyNode>>, FlowError> {
        let mut nodes = HashMap::with_capacity(self.nodes.len());
        for entry in &self.nodes {
            let node = registry
                .create(&entry.node_type, entry.config.clone())
                .map_err(|_| FlowError::UnknownNodeType(entry.node_type.clone()))?;
            nodes.insert(entry.id.clone(), node);
        }
        Ok(nodes)
    }

    /// Edges whose target endpoint is a port with the given direction,
    /// grouped by source node — used by the scheduler to find everything a
    /// resolved output port must be delivered to.
    pub fn outgoing_edges(&self, node_id: &str, port_id: &str) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.active && e.source_node == node_id && e.source_port == port_id)
            .collect()
    }

    pub fn incoming_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.active && e.target_node == node_id)
            .collect()
    }
}

fn topological_order(nodes: &[NodeEntry], edges: &[Edge]) -> Result<Vec<String>, FlowError> {
    let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }

    for edge in edges {
        if !node_ids.contains(edge.source_node.as_str()) {
            return Err(FlowError::InvalidEdge {
                edge_id: edge.id.clone(),
                reason: format!("unknown source node {}", edge.source_node),
            });
        }
        if !node_ids.contains(edge.target_node.as_str()) {
            return Err(FlowError::InvalidEdge {
                edge_id: edge.id.clone(),
                reason: format!("unknown target node {}", edge.target_node),
            });
        }
        adjacency
            .entry(edge.source_node.as_str())
            .or_default()
            .push(edge.target_node.as_str());
        *in_degree.entry(edge.target_node.as_str()).or_insert(0) += 1;
    }

    // Deterministic tie-break: process the ready set in lexicographic id
    // order, not insertion order.
    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    ready.sort_unstable();
    let mut queue: VecDeque<&str> = ready.into();

    let mut sorted = Vec::with_capacity(nodes.len());
    while let Some(id) = queue.pop_front() {
        sorted.push(id.to_owned());
        if let Some(neighbours) = adjacency.get(id) {
            let mut newly_ready = Vec::new();
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(neighbour);
                }
            }
            newly_ready.sort_unstable();
            for n in newly_ready {
                queue.push_back(n);
            }
        }
    }

    if sorted.len() != nodes.len() {
        // A remaining node with nonzero in-degree means a cycle; report the
        // lexicographically-first one for a reproducible error message.
        let mut cyclic: Vec<&str> = in_degree
            .iter()
            .filter(|(id, &d)| d > 0 && !sorted.contains(&id.to_string()))
            .map(|(&id, _)| id)
            .collect();
        cyclic.sort_unstable();
        return Err(FlowError::InvalidEdge {
            edge_id: cyclic.first().copied().unwrap_or("<unknown>").to_string(),
            reason: "flow graph contains a cycle".to_string(),
        });
    }

    Ok(sorted)
}

/// Returns true if `direction` may legally sit at the output end of an edge.
pub fn is_edge_source_direction(direction: PortDirection) -> bool {
    matches!(direction, PortDirection::Output | PortDirection::Passthrough)
}

/// Returns true if `direction` may legally sit at the input end of an edge.
pub fn is_edge_target_direction(direction: PortDirection) -> bool {
    matches!(direction, PortDirection::Input | PortDirection::Passthrough)
}
