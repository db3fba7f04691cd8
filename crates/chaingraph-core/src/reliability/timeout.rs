//! Timeout configuration and elapsed-time checks for queued tasks.
//!
//! Grounded on the teacher's `TimeoutConfig`/`TimeoutError`
//! (`crates/durable/src/reliability/timeout.rs`), renamed from activity-
//! centric fields (`schedule_to_start`, `start_to_close`) to the task-queue
//! vocabulary this crate uses. Unlike the teacher's copy — whose `timeout`
//! submodule is never declared in `reliability/mod.rs` and so isn't reachable
//! from outside the crate — this one is wired into `reliability::mod` from
//! the start.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeoutError {
    #[error("task timed out waiting to be claimed (waited {elapsed:?}, limit {limit:?})")]
    ScheduleToClaimTimeout { elapsed: Duration, limit: Duration },

    #[error("task execution timed out (ran for {elapsed:?}, limit {limit:?})")]
    ExecutionTimeout { elapsed: Duration, limit: Duration },

    #[error("task heartbeat timed out (no heartbeat for {elapsed:?}, limit {limit:?})")]
    HeartbeatTimeout { elapsed: Duration, limit: Duration },
}

/// Timeout budget for one queued task, checked by the worker runtime
/// (component C7) and the queue's stale-task reclaimer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum time a task may sit pending before a worker claims it.
    #[serde(with = "duration_millis")]
    pub schedule_to_claim: Duration,

    /// Maximum time from claim to completion. Defaults to 35 minutes, long
    /// enough to cover a flow with many sequential nodes without masking a
    /// genuinely stuck worker indefinitely.
    #[serde(with = "duration_millis")]
    pub execution: Duration,

    /// Maximum time between heartbeats before the task is considered
    /// abandoned and reclaimed.
    #[serde(with = "option_duration_millis")]
    pub heartbeat: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            schedule_to_claim: Duration::from_secs(60),
            execution: Duration::from_secs(35 * 60),
            heartbeat: Some(Duration::from_secs(30)),
        }
    }
}

impl TimeoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedule_to_claim(mut self, timeout: Duration) -> Self {
        self.schedule_to_claim = timeout;
        self
    }

    pub fn with_execution(mut self, timeout: Duration) -> Self {
        self.execution = timeout;
        self
    }

    pub fn with_heartbeat(mut self, timeout: Duration) -> Self {
        self.heartbeat = Some(timeout);
        self
    }

    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat = None;
        self
    }

    pub fn check_schedule_to_claim(&self, elapsed: Duration) -> Result<(), TimeoutError> {
        if elapsed > self.schedule_to_claim {
            Err(TimeoutError::ScheduleToClaimTimeout { elapsed, limit: self.schedule_to_claim })
        } else {
            Ok(())
        }
    }

    pub fn check_execution(&self, elapsed: Duration) -> Result<(), TimeoutError> {
        if elapsed > self.execution {
            Err(TimeoutError::ExecutionTimeout { elapsed, limit: self.execution })
        } else {
            Ok(())
        }
    }

    pub fn check_heartbeat(&self, elapsed: Duration) -> Result<(), TimeoutError> {
        match self.heartbeat {
            Some(limit) if elapsed > limit => Err(TimeoutError::HeartbeatTimeout { elapsed, limit }),
            _ => Ok(()),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_execution_window() {
        let config = TimeoutConfig::default();
        assert_eq!(config.execution, Duration::from_secs(35 * 60));
    }

    #[test]
    fn execution_timeout_trips_past_the_limit() {
        let config = TimeoutConfig::default().with_execution(Duration::from_secs(10));
        assert!(config.check_execution(Duration::from_secs(11)).is_err());
        assert!(config.check_execution(Duration::from_secs(9)).is_ok());
    }

    #[test]
    fn no_heartbeat_requirement_never_times_out() {
        let config = TimeoutConfig::default().without_heartbeat();
        assert!(config.check_heartbeat(Duration::from_secs(10_000)).is_ok());
    }
}
