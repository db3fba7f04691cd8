//! Port / node / flow data model (components C1 and C2).

pub mod flow;
pub mod node;
pub mod port;

pub use flow::{Edge, Flow, FlowError, NodeEntry};
pub use node::{AnyNode, Node, NodeEvent, NodeMetadata, NodeOutcome, NodeRegistry, NodeRegistryError, NodeStatus};
pub use port::{Port, PortConfig, PortDirection, PortKind};
