//! Worker process entry point.
//!
//! Wires the Postgres-backed stores (C4/C5/§6 schema, signal mailbox) to a
//! [`chaingraph_worker::Worker`], serves the `/health` route (§6), and
//! drains in-flight executions on SIGTERM/SIGINT.
//!
//! Grounded on `everruns-worker/src/main.rs`'s shape (env-driven database
//! connection, tracing init, run-until-signal) generalized with the
//! telemetry crate's OTLP wiring and an actual poll loop instead of a
//! passive "API triggers workflows" worker.

use std::sync::Arc;

use anyhow::{Context, Result};
use chaingraph_core::graph::NodeRegistry;
use chaingraph_core::orchestrator::{PostgresExecutionStore, PostgresSignalStore};
use chaingraph_core::queue::PostgresTaskQueue;
use chaingraph_core::stream::PostgresEventStream;
use chaingraph_telemetry::TelemetryConfig;
use chaingraph_worker::{StaticFlowProvider, Worker, WorkerConfig};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry_guard = chaingraph_telemetry::init(TelemetryConfig::from_env());
    tracing::info!("chaingraph-worker starting");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let pool = PgPoolOptions::new().max_connections(20).connect(&database_url).await.context("connecting to database")?;
    tracing::info!("database connection established");

    let config = WorkerConfig::from_env();

    let executions = Arc::new(PostgresExecutionStore::new(pool.clone()));
    let tasks = Arc::new(PostgresTaskQueue::new(pool.clone()));
    let stream = Arc::new(PostgresEventStream::new(pool.clone()));
    let signals = Arc::new(PostgresSignalStore::new(pool.clone()));

    // Node implementations belong to the embedding application's node
    // library (§6, out of scope); a real deployment registers its nodes
    // here before starting the worker.
    let registry = Arc::new(NodeRegistry::new());

    // Flow definitions are read-only during execution and their storage is
    // likewise the embedding application's concern (§6); a real deployment
    // supplies its own `FlowProvider` here.
    let flows = Arc::new(StaticFlowProvider::new(vec![]));

    let worker = Arc::new(Worker::new(config.clone(), executions, tasks, stream, signals, flows, registry));

    let health_router = chaingraph_worker::health::router(worker.health.clone());
    let health_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.health_port)).await.context("binding health listener")?;
    let health_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, health_router).await {
            tracing::error!(error = %e, "health server exited");
        }
    });

    let run_handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");

    if let Err(e) = worker.shutdown().await {
        tracing::warn!(error = %e, "worker did not drain cleanly within the shutdown timeout");
    }

    run_handle.abort();
    health_server.abort();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
