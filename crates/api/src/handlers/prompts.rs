//! Handlers for `/prompts`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use cosmos_core::types::DbId;
use cosmos_db::models::prompt::PromptListQuery;
use cosmos_orchestrator::NewPrompt;
use serde::Deserialize;

use crate::error::AppResult;
use crate::query::PromptListParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /prompts/{id}/enhanced`.
#[derive(Debug, Deserialize)]
pub struct EnhancedPromptBody {
    pub description: String,
}

/// GET /prompts
pub async fn list_prompts(
    State(state): State<AppState>,
    Query(params): Query<PromptListParams>,
) -> AppResult<impl IntoResponse> {
    let query = PromptListQuery {
        search: params.search.filter(|s| !s.trim().is_empty()),
        limit: params.limit,
        offset: params.offset,
    };
    let prompts = state.orchestrator.list_prompts(&query).await?;
    tracing::debug!(count = prompts.len(), "Listed prompts");
    Ok(Json(DataResponse { data: prompts }))
}

/// POST /prompts
pub async fn create_prompt(
    State(state): State<AppState>,
    Json(input): Json<NewPrompt>,
) -> AppResult<impl IntoResponse> {
    let prompt = state.orchestrator.create_prompt(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: prompt })))
}

/// GET /prompts/{id}
pub async fn get_prompt(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let prompt = state.orchestrator.get_prompt(id).await?;
    Ok(Json(DataResponse { data: prompt }))
}

/// DELETE /prompts/{id}
///
/// Removes the prompt, its runs and their local artifacts.
pub async fn delete_prompt(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    state.orchestrator.delete_prompt(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /prompts/{id}/enhanced
///
/// Stores text produced by an external enhancer as a new child prompt.
pub async fn store_enhanced(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<EnhancedPromptBody>,
) -> AppResult<impl IntoResponse> {
    let prompt = state
        .orchestrator
        .enhance_prompt_record(id, &body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: prompt })))
}
