//! In-process execution engine (component C3): runs one flow instance to
//! completion given already-instantiated nodes, honoring abort/debug
//! signals and collecting emitted child-execution requests. Durability
//! (checkpointing, replay, start-signal waits) lives one layer up in
//! `orchestrator`.

pub mod context;
pub mod event;
pub mod scheduler;

pub use context::{AbortController, CommandController, DebugCommand, EmittedChildEvent, NodeExecutionContext};
pub use event::ExecutionEvent;
pub use scheduler::{EngineConfig, EventSink, ExecutionEngine, ExecutionOutcome, FlowRunStatus};
