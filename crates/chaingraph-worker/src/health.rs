//! `GET /health` liveness endpoint (§6), modeled on the teacher's
//! `everruns-api`/`control-plane` health route
//! (`Json<HealthResponse>` behind `State<HealthState>`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

/// Shared flag the poll loop flips once it has stopped accepting new work,
/// so `/health` can report 503 during drain without racing the shutdown
/// sequence.
#[derive(Clone)]
pub struct HealthState {
    worker_id: Arc<String>,
    started_at: Instant,
    running: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self { worker_id: Arc::new(worker_id.into()), started_at: Instant::now(), running: Arc::new(AtomicBool::new(true)) }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(rename = "workerId")]
    worker_id: String,
    pid: u32,
    uptime: u64,
    timestamp: String,
    running: bool,
}

async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let running = state.running.load(Ordering::SeqCst);
    let body = HealthResponse {
        status: if running { "ok" } else { "draining" },
        worker_id: (*state.worker_id).clone(),
        pid: std::process::id(),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        running,
    };
    let code = if running { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health).with_state(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_running_until_flipped() {
        let state = HealthState::new("worker-1");
        let (code, Json(body)) = health(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.running);

        state.set_running(false);
        let (code, Json(body)) = health(State(state)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.running);
    }
}
