mod stream;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/stream/{id}", get(stream::stream_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
