use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::{request_tracing, ServerState};

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        Router::new()
            .route("/", get(|| async { "sequencer" }))
            .route("/sequences/:id/launch", post(super::control::launch))
            .route("/sequences/:id/pause", post(super::control::pause))
            .route("/sequences/:id/resume", post(super::control::resume))
            .route("/sequences/:id/reset", post(super::control::reset))
            .route("/t/open/:hash", get(super::tracking::track_open))
            .route("/t/click/:hash", get(super::tracking::track_click))
            .route("/gmail/push", post(super::push::handle))
            .layer(request_tracing::trace_with_request_id_layer())
            .layer(CorsLayer::permissive())
            .with_state(state.clone())
            .fallback(handler_404)
    }
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
