//! Handlers for `/runs`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use cosmos_core::error::CoreError;
use cosmos_core::types::DbId;
use cosmos_db::models::run::RunListQuery;
use cosmos_db::models::status::RunStatus;
use cosmos_orchestrator::{CancelOutcome, NewRun};

use crate::error::{AppError, AppResult};
use crate::handlers::detached;
use crate::query::RunListParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /runs
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<RunListParams>,
) -> AppResult<impl IntoResponse> {
    let status_id = params
        .status
        .as_deref()
        .map(|name| {
            RunStatus::from_name(name)
                .map(RunStatus::id)
                .ok_or_else(|| AppError::BadRequest(format!("unknown run status '{name}'")))
        })
        .transpose()?;

    let query = RunListQuery {
        status_id,
        prompt_id: params.prompt_id,
        model_type: params.model_type,
        batch_id: params.batch_id,
        limit: params.limit,
        offset: params.offset,
    };
    let runs = state.orchestrator.list_runs(&query).await?;
    tracing::debug!(count = runs.len(), "Listed runs");
    Ok(Json(DataResponse { data: runs }))
}

/// POST /runs
///
/// Creates a pending run; the next tick picks it up.
pub async fn create_run(
    State(state): State<AppState>,
    Json(input): Json<NewRun>,
) -> AppResult<impl IntoResponse> {
    let run = state.orchestrator.create_run(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: run })))
}

/// GET /runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let detail = state.orchestrator.get_run(id).await?;
    Ok(Json(DataResponse { data: detail }))
}

/// DELETE /runs/{id}
pub async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    state.orchestrator.delete_run(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /runs/{id}/cancel
///
/// A run that already finished answers 409.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.orchestrator.cancel_run(id).await?;
    if let CancelOutcome::AlreadyTerminal { status } = outcome {
        return Err(AppError::Core(CoreError::Conflict(format!(
            "run {id} is already {}",
            status.name()
        ))));
    }
    Ok(Json(DataResponse { data: outcome }))
}

/// POST /runs/{id}/retry
pub async fn retry_run(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let run = state.orchestrator.retry_run(id).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: run })))
}

/// POST /runs/{id}/run-now
///
/// Blocks until the run is terminal. Answers 409 when the GPU is busy.
pub async fn run_now(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let orchestrator = state.orchestrator.clone();
    let run = detached(async move { orchestrator.run_now(id).await.map_err(AppError::from) }).await?;
    Ok(Json(DataResponse { data: run }))
}

/// POST /runs/{id}/enqueue
pub async fn enqueue_run(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let run = state.orchestrator.enqueue(id).await?;
    Ok(Json(DataResponse { data: run }))
}
