//! Worker runtime (component C7): hosts the queue consumer, launches one
//! [`Orchestrator`] run per claimed task, and shuts down cleanly.
//!
//! Grounded on the teacher's `WorkerPool` (`crates/durable/src/worker/pool.rs`):
//! a `Semaphore`-bounded poll loop claiming batches of tasks, a per-claim
//! heartbeat so a crashed worker's claims go stale and get reclaimed, a
//! periodic stale-reclaim sweep, and `watch`-channel graceful shutdown with
//! a drain timeout. Generalized from bare activity handlers to running a
//! full [`Orchestrator`] instance per claimed task and folding child
//! executions into the same queue rather than returning one activity result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chaingraph_core::engine::FlowRunStatus;
use chaingraph_core::orchestrator::{ExecutionStore, NewExecution, Orchestrator, SignalStore};
use chaingraph_core::queue::{ClaimedTask, TaskQueue};
use chaingraph_core::stream::EventStream;
use chaingraph_core::ChaingraphError;
use chaingraph_core::graph::NodeRegistry;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::WorkerConfig;
use crate::flow_provider::FlowProvider;
use crate::health::HealthState;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker is already running")]
    AlreadyRunning,
    #[error("graceful shutdown timed out with {0} task(s) still in flight")]
    ShutdownTimeout(usize),
    #[error("store error: {0}")]
    Store(#[from] chaingraph_core::queue::StoreError),
}

/// Everything a worker process needs to run claimed tasks to completion.
pub struct Worker {
    config: WorkerConfig,
    executions: Arc<dyn ExecutionStore>,
    tasks: Arc<dyn TaskQueue>,
    stream: Arc<dyn EventStream>,
    signals: Arc<dyn SignalStore>,
    flows: Arc<dyn FlowProvider>,
    registry: Arc<NodeRegistry>,
    active: Arc<Semaphore>,
    in_flight: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    pub health: HealthState,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        executions: Arc<dyn ExecutionStore>,
        tasks: Arc<dyn TaskQueue>,
        stream: Arc<dyn EventStream>,
        signals: Arc<dyn SignalStore>,
        flows: Arc<dyn FlowProvider>,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let health = HealthState::new(config.worker_id.clone());
        Self {
            active: Arc::new(Semaphore::new(config.worker_concurrency)),
            in_flight: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
            shutdown_rx,
            health,
            config,
            executions,
            tasks,
            stream,
            signals,
            flows,
            registry,
        }
    }

    /// Run the poll/heartbeat/reclaim loops until `shutdown()` is called
    /// from another task, or the process is killed.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn run(&self) {
        info!(
            worker_concurrency = self.config.worker_concurrency,
            global_concurrency = self.config.global_concurrency,
            "starting worker"
        );

        let reclaim = self.spawn_reclaim_loop();
        self.poll_loop().await;
        reclaim.abort();
    }

    /// Stop accepting new claims and wait for in-flight tasks to finish
    /// checkpointing, up to `shutdown_timeout`.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        info!("initiating graceful shutdown");
        self.health.set_running(false);
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let remaining = self.in_flight.load(Ordering::SeqCst);
            if remaining == 0 {
                debug!("all in-flight tasks drained");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining, "shutdown timeout reached with tasks still in flight");
                return Err(WorkerError::ShutdownTimeout(remaining as usize));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn poll_loop(&self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            if *shutdown_rx.borrow() {
                debug!("poll loop: shutdown requested");
                break;
            }

            let available_permits = self.active.available_permits();
            let under_global_budget = match self.executions.count_active().await {
                Ok(active) => active < self.config.global_concurrency,
                Err(e) => {
                    error!(error = %e, "failed to read active execution count, skipping this poll");
                    false
                }
            };

            if available_permits == 0 || !under_global_budget {
                if wait_or_shutdown(&mut shutdown_rx, self.config.poll_interval).await {
                    break;
                }
                continue;
            }

            let claimed = match self
                .tasks
                .claim(&self.config.worker_id, &self.config.engine.app_version, available_permits)
                .await
            {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!(error = %e, "task claim failed");
                    if wait_or_shutdown(&mut shutdown_rx, self.config.poll_interval).await {
                        break;
                    }
                    continue;
                }
            };

            if claimed.is_empty() {
                if wait_or_shutdown(&mut shutdown_rx, self.config.poll_interval).await {
                    break;
                }
                continue;
            }

            for claim in claimed {
                self.spawn_task_runner(claim);
            }
        }
    }

    fn spawn_task_runner(&self, claim: ClaimedTask) {
        let permit = match Arc::clone(&self.active).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return,
        };
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let executions = self.executions.clone();
        let tasks = self.tasks.clone();
        let stream = self.stream.clone();
        let signals = self.signals.clone();
        let flows = self.flows.clone();
        let registry = self.registry.clone();
        let engine_config = self.config.engine.clone();
        let worker_id = self.config.worker_id.clone();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let execution_id = claim.definition.execution_id;

            let result = run_one_task(
                &claim,
                &worker_id,
                executions,
                tasks.clone(),
                stream,
                signals,
                flows,
                registry,
                engine_config,
            )
            .await;

            match result {
                Ok(outcome) => {
                    let result_json = serde_json::json!({
                        "status": format!("{:?}", outcome.status),
                        "childExecutionIds": outcome.child_execution_ids,
                    });
                    if let Err(e) = tasks.complete(claim.id, result_json).await {
                        error!(%execution_id, error = %e, "failed to mark task complete");
                    }
                }
                Err(e) => {
                    warn!(%execution_id, error = %e, "execution failed");
                    if let Err(e) = tasks.fail(claim.id, e.to_string()).await {
                        error!(%execution_id, error = %e, "failed to mark task failed");
                    }
                }
            }

            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn spawn_reclaim_loop(&self) -> JoinHandle<()> {
        let tasks = self.tasks.clone();
        let interval = self.config.stale_reclaim_interval;
        let stale_threshold_secs = self.config.stale_threshold_secs;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match tasks.reclaim_stale(stale_threshold_secs).await {
                            Ok(count) if count > 0 => info!(count, "reclaimed stale tasks"),
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "stale task reclamation failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("reclaim loop: shutdown requested");
                        break;
                    }
                }
            }
        })
    }
}


async fn wait_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, timeout: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(timeout) => false,
        _ = shutdown_rx.changed() => true,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_one_task(
    claim: &ClaimedTask,
    worker_id: &str,
    executions: Arc<dyn ExecutionStore>,
    tasks: Arc<dyn TaskQueue>,
    stream: Arc<dyn EventStream>,
    signals: Arc<dyn SignalStore>,
    flows: Arc<dyn FlowProvider>,
    registry: Arc<NodeRegistry>,
    engine_config: chaingraph_core::EngineConfig,
) -> Result<chaingraph_core::orchestrator::OrchestratorOutcome, ChaingraphError> {
    let definition = &claim.definition;
    let flow = flows.get_flow(definition.flow_id).await.map_err(|e| ChaingraphError::NotFound(e.to_string()))?;

    // Idempotent: `create` is `ON CONFLICT (id) DO NOTHING`, so this is a
    // no-op when the client already created the row at enqueue time (C8)
    // and a safety net when this worker is driven directly in tests.
    executions
        .create(NewExecution {
            id: definition.execution_id,
            flow_id: definition.flow_id,
            owner_id: None,
            debug: false,
            root_execution_id: definition.root_execution_id,
            parent_execution_id: definition.parent_execution_id,
            execution_depth: definition.depth,
            integration_context: serde_json::json!({}),
            event_data: None,
        })
        .await?;

    let heartbeat = spawn_claim_heartbeat(tasks.clone(), claim.id, worker_id.to_string());

    let orchestrator = Orchestrator::new(executions.clone(), tasks, stream, signals, registry, engine_config);
    let outcome = orchestrator.run(definition.execution_id, &flow, false).await;

    heartbeat.abort();

    let outcome = outcome?;
    if outcome.status == FlowRunStatus::Failed {
        return Err(ChaingraphError::Fatal(outcome.error.clone().unwrap_or_else(|| "execution failed".to_string())));
    }
    Ok(outcome)
}

fn spawn_claim_heartbeat(tasks: Arc<dyn TaskQueue>, task_id: uuid::Uuid, worker_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            match tasks.heartbeat(task_id, &worker_id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(%task_id, "claim reclaimed as stale, abandoning execution");
                    break;
                }
                Err(e) => error!(%task_id, error = %e, "heartbeat failed"),
            }
        }
    })
}
