//! Routes mounted at `/prompts`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::prompts;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(prompts::list_prompts).post(prompts::create_prompt))
        .route(
            "/{id}",
            get(prompts::get_prompt).delete(prompts::delete_prompt),
        )
        .route("/{id}/enhanced", post(prompts::store_enhanced))
}
