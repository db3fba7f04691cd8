//! Durable flow-execution core.
//!
//! Layered bottom to top:
//! - [`graph`] — the port/node/flow data model (components C1, C2)
//! - [`engine`] — the in-process scheduler that runs one flow (component C3)
//! - [`stream`] — the durable, subscribable event log (component C4)
//! - [`queue`] — the crash-safe task queue (component C5)
//! - [`orchestrator`] — checkpointing, signals, and child spawning (C6)
//! - [`reliability`] — retry/circuit-breaker/timeout policy types shared by
//!   callers of this crate (not used internally by the engine itself)
//!
//! [`config`] and [`error`] are the ambient pieces: environment-driven
//! configuration and the crate-wide error taxonomy everything else converts
//! into at its public boundary.

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod queue;
pub mod reliability;
pub mod store_error;
pub mod stream;

pub use config::EngineConfig;
pub use error::ChaingraphError;

/// Re-exports covering the common path through this crate: build a
/// [`graph::Flow`] against a [`graph::NodeRegistry`], then run it with
/// [`orchestrator::Orchestrator`].
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{
        AbortController, CommandController, DebugCommand, EngineConfig as EngineRunConfig, EventSink,
        ExecutionEngine, ExecutionEvent, ExecutionOutcome, FlowRunStatus,
    };
    pub use crate::error::ChaingraphError;
    pub use crate::graph::{AnyNode, Edge, Flow, Node, NodeEntry, NodeRegistry, Port, PortConfig, PortDirection};
    pub use crate::orchestrator::{ExecutionStatus, ExecutionStore, Orchestrator, Signal, SignalStore};
    pub use crate::queue::{ClaimedTask, TaskDefinition, TaskQueue, TaskStatus};
    pub use crate::stream::{BatchingEventSink, EventStream, StreamRecord};
}
