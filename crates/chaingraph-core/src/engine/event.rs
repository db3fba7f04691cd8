//! The closed event taxonomy emitted by the execution engine and persisted
//! into the event stream (component C4).
//!
//! Modeled directly on the teacher's `WorkflowEvent` (`crates/durable/src/
//! workflow/event.rs`): one `#[serde(tag = "type")]` enum, one variant per
//! wire-stable event kind, immutable once written.

use serde::{Deserialize, Serialize};

/// Lifecycle and scheduling events a running execution emits, in the order
/// the engine produces them. `index = -1` (`EXECUTION_CREATED`) is assigned
/// by the orchestrator before the engine starts; every other event is
/// assigned a non-negative, strictly increasing index by the stream writer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionEvent {
    /// Always index -1; written once, before the start signal is awaited.
    ExecutionCreated {
        flow_id: uuid::Uuid,
        root_execution_id: uuid::Uuid,
        #[serde(default)]
        parent_execution_id: Option<uuid::Uuid>,
        depth: u32,
    },

    FlowSubscribed {
        subscriber_count: usize,
    },

    FlowStarted,

    FlowCompleted {
        duration_ms: u64,
    },

    FlowFailed {
        error: String,
    },

    FlowCancelled {
        reason: String,
    },

    FlowPaused,

    FlowResumed,

    NodeStarted {
        node_id: String,
    },

    NodeCompleted {
        node_id: String,
    },

    NodeFailed {
        node_id: String,
        error: String,
    },

    NodeSkipped {
        node_id: String,
        reason: String,
    },

    NodeStatusChanged {
        node_id: String,
        status: crate::graph::NodeStatus,
    },

    EdgeTransferStarted {
        edge_id: String,
        source_node: String,
        source_port: String,
        target_node: String,
        target_port: String,
    },

    EdgeTransferCompleted {
        edge_id: String,
    },

    EdgeTransferFailed {
        edge_id: String,
        error: String,
    },

    DebugBreakpointHit {
        node_id: String,
    },
}

impl ExecutionEvent {
    /// A `FLOW_*` event that ends the stream for this execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::FlowCompleted { .. }
                | ExecutionEvent::FlowFailed { .. }
                | ExecutionEvent::FlowCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_tag_uses_screaming_snake_case() {
        let event = ExecutionEvent::FlowStarted;
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "FLOW_STARTED");
    }

    #[test]
    fn terminal_events_are_identified() {
        assert!(ExecutionEvent::FlowCompleted { duration_ms: 1 }.is_terminal());
        assert!(ExecutionEvent::FlowFailed { error: "x".into() }.is_terminal());
        assert!(ExecutionEvent::FlowCancelled { reason: "x".into() }.is_terminal());
        assert!(!ExecutionEvent::FlowStarted.is_terminal());
        assert!(!ExecutionEvent::NodeStarted { node_id: "a".into() }.is_terminal());
    }
}
