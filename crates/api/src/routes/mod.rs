pub mod health;
pub mod prompts;
pub mod queue;
pub mod runs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /prompts                      list (?search=), create
/// /prompts/{id}                 get, delete
/// /prompts/{id}/enhanced        store enhanced text as a child prompt
///
/// /runs                         list (filters), create
/// /runs/{id}                    get (detail), delete
/// /runs/{id}/cancel             cancel
/// /runs/{id}/retry              reset a failed/cancelled run to pending
/// /runs/{id}/run-now            claim and execute this run if the GPU is free
/// /runs/{id}/enqueue            confirm a run is queued
///
/// /queue/tick                   one queue tick
/// /queue/kill                   stop every active invocation
/// /queue/status                 GPU and queue status
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/prompts", prompts::router())
        .nest("/runs", runs::router())
        .nest("/queue", queue::router())
}
