//! Crate-wide configuration loaded from the environment.
//!
//! Grounded on the teacher's `WorkerPoolConfig`/`ObservabilityConfig::from_env`
//! builders (`crates/durable/src/worker/pool.rs`,
//! `crates/everruns-observability/src/config.rs`): a typed struct with
//! sensible defaults, overridden one variable at a time, never a single
//! monolithic parser.

use std::env;
use std::time::Duration;

/// Process-wide identity and depth/timeout knobs shared by every component
/// that touches an execution, independent of whether this process is a
/// full worker (C7) or a producer-only client (C8).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Compatible-code-cohort marker. A task enqueued under one version is
    /// only dequeued by a worker reporting the same version (§6).
    pub app_version: String,
    /// `depth ≤ max_execution_depth`; exceeding it fails the child spawn.
    pub max_execution_depth: u32,
    /// How long a root execution waits for `START_SIGNAL` before failing.
    pub start_signal_timeout_root: Duration,
    /// How long a child execution waits for its self-sent `START_SIGNAL`
    /// before the orchestrator treats the absence as a protocol violation.
    pub start_signal_timeout_child: Duration,
    /// Hard per-task deadline; guarantees eventual termination regardless
    /// of cooperative cancellation behaving correctly.
    pub task_timeout: Duration,
    /// How often a child execution polls its parent's status, aborting as
    /// soon as the parent reaches any terminal status (§4.6 "Parent
    /// monitoring", §5 "Parent-status poll: 1 s").
    pub parent_poll_interval: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            app_version: env::var("APP_VERSION").unwrap_or_else(|_| "dev".to_string()),
            max_execution_depth: parse_env("MAX_EXECUTION_DEPTH", 16),
            start_signal_timeout_root: Duration::from_secs(parse_env(
                "START_SIGNAL_TIMEOUT_ROOT",
                300,
            )),
            start_signal_timeout_child: Duration::from_secs(parse_env(
                "START_SIGNAL_TIMEOUT_CHILD",
                10,
            )),
            task_timeout: Duration::from_secs(parse_env("TASK_TIMEOUT", 35 * 60)),
            parent_poll_interval: Duration::from_secs(parse_env("PARENT_STATUS_POLL_INTERVAL", 1)),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_version: "dev".to_string(),
            max_execution_depth: 16,
            start_signal_timeout_root: Duration::from_secs(300),
            start_signal_timeout_child: Duration::from_secs(10),
            task_timeout: Duration::from_secs(35 * 60),
            parent_poll_interval: Duration::from_secs(1),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
