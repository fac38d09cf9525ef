//! Routes mounted at `/queue`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::queue;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tick", post(queue::tick))
        .route("/kill", post(queue::kill))
        .route("/status", get(queue::status))
}
