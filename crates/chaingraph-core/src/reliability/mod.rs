//! Reliability policy types used by callers building node bodies or
//! worker-side retry handling around the task queue. Not consulted by the
//! engine or orchestrator directly — task-level retry is the queue's own
//! `TaskQueue::fail` bookkeeping (component C5); these are for node
//! authors wrapping flaky external calls.

pub mod circuit_breaker;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;
pub use timeout::{TimeoutConfig, TimeoutError};
