//! Durable, subscribable event stream (component C4).

pub mod batching;
pub mod memory;
pub mod postgres;
pub mod store;

pub use batching::{run_flush_timer, BatchingEventSink};
pub use memory::InMemoryEventStream;
pub use postgres::PostgresEventStream;
pub use store::{EventStream, StoreError, StreamRecord};
