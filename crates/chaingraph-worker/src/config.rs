//! Worker process configuration.
//!
//! Grounded on the teacher's `WorkerPoolConfig` builder
//! (`crates/durable/src/worker/pool.rs`) and `chaingraph_core::EngineConfig`'s
//! `_from_env()` convention: every knob is a separate environment variable
//! with a sensible default, never one combined parser.

use std::env;
use std::time::Duration;

use chaingraph_core::EngineConfig;

/// Process-local settings layered on top of the shared [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Max tasks this process runs concurrently (`C_worker`, §6).
    pub worker_concurrency: usize,
    /// Cluster-wide cap on non-terminal executions (`C_global`, §6),
    /// enforced via [`chaingraph_core::ExecutionStore::count_active`]
    /// before claiming more tasks than the budget allows.
    pub global_concurrency: u64,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub stale_reclaim_interval: Duration,
    pub stale_threshold_secs: i64,
    pub shutdown_timeout: Duration,
    pub health_port: u16,
    pub engine: EngineConfig,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            worker_id: env::var("WORKER_ID").unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::now_v7())),
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 10),
            global_concurrency: parse_env("GLOBAL_CONCURRENCY", 100),
            poll_interval: Duration::from_millis(parse_env("POLL_INTERVAL_MS", 250)),
            heartbeat_interval: Duration::from_secs(parse_env("HEARTBEAT_INTERVAL_SECS", 15)),
            stale_reclaim_interval: Duration::from_secs(parse_env("STALE_RECLAIM_INTERVAL_SECS", 30)),
            stale_threshold_secs: parse_env("STALE_THRESHOLD_SECS", 60),
            shutdown_timeout: Duration::from_secs(parse_env("SHUTDOWN_TIMEOUT_SECS", 30)),
            health_port: parse_env("HEALTH_PORT", 8080),
            engine: EngineConfig::from_env(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = WorkerConfig { worker_id: "w".into(), ..WorkerConfig::from_env() };
        assert_eq!(config.worker_concurrency, 10);
        assert_eq!(config.global_concurrency, 100);
        assert_eq!(config.health_port, 8080);
    }
}
