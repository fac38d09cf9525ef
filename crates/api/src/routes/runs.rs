//! Routes mounted at `/runs`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::runs;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(runs::list_runs).post(runs::create_run))
        .route("/{id}", get(runs::get_run).delete(runs::delete_run))
        .route("/{id}/cancel", post(runs::cancel_run))
        .route("/{id}/retry", post(runs::retry_run))
        .route("/{id}/run-now", post(runs::run_now))
        .route("/{id}/enqueue", post(runs::enqueue_run))
}
