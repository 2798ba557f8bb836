use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(crate::routes::health::health))
        // Session
        .route("/session", get(crate::routes::session::get_session))
        .route("/session/stream", get(crate::routes::session::session_stream))
        .route(
            "/session/select/{id}",
            post(crate::routes::session::select_test),
        )
        .route("/session/stop", post(crate::routes::session::stop_session))
        .route("/session/cancel", post(crate::routes::session::cancel_test))
        .route("/session/export", get(crate::routes::session::export_session))
        // Logs
        .route("/logs/history", get(crate::routes::logs::log_history))
        .route("/logs/stream", get(crate::routes::logs::log_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
