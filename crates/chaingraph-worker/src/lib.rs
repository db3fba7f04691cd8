//! Worker runtime (component C7): claims tasks from the durable queue (C5),
//! runs one [`chaingraph_core::orchestrator::Orchestrator`] per claim, and
//! exposes a liveness endpoint for an external supervisor.
//!
//! Grounded throughout on the teacher's `WorkerPool`
//! (`crates/durable/src/worker/pool.rs`): poll/heartbeat/reclaim background
//! loops, `watch`-channel graceful shutdown with a drain timeout, and a
//! health route lifted from `everruns-api`'s `/health` handler.

pub mod config;
pub mod flow_provider;
pub mod health;
pub mod worker;

pub use config::WorkerConfig;
pub use flow_provider::{FlowLookupError, FlowProvider, StaticFlowProvider};
pub use health::HealthState;
pub use worker::{Worker, WorkerError};
