use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub api_url: String,
    pub started_at: String,
    pub monitoring: Option<String>,
    pub polling: bool,
}

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let monitoring = state.session.selected_id().await;
    let polling = state.session.poller().active_id().is_some();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        api_url: state.api_url.clone(),
        started_at: state.started_at.to_rfc3339(),
        monitoring,
        polling,
    })
}
