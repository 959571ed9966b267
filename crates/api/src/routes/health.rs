//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use state_store::StateStore;

use super::sagas::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub saga_type: String,
    /// Sagas that currently have a worker in this process.
    pub workers: usize,
}

/// GET /health — reports liveness and the saga workers held by this process.
pub async fn check<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        saga_type: state.host.orchestrator().config().saga_type.clone(),
        workers: state.host.worker_count().await,
    })
}
