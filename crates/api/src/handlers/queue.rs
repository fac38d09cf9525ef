//! Handlers for `/queue`.
//!
//! The UI polls `POST /queue/tick` on a timer; each call is one tick.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::{AppError, AppResult};
use crate::handlers::detached;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /queue/tick
pub async fn tick(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let orchestrator = state.orchestrator.clone();
    let outcome = detached(async move { orchestrator.tick().await.map_err(AppError::from) }).await?;
    Ok(Json(DataResponse { data: outcome }))
}

/// POST /queue/kill
pub async fn kill(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let report = state.orchestrator.kill_active().await?;
    tracing::warn!(
        cancel_requested = ?report.cancel_requested,
        terminated = report.terminated.len(),
        "Kill requested through the API"
    );
    Ok(Json(DataResponse { data: report }))
}

/// GET /queue/status
pub async fn status(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let status = state.orchestrator.system_status().await?;
    Ok(Json(DataResponse { data: status }))
}
