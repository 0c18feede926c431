pub mod health;
pub mod process;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/process-video/", post(process::process_video))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
