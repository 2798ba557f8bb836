use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::error::MonitorError;
use crate::handoff;
use crate::session::SessionView;
use crate::state::SharedState;

/// GET /session: current view of the monitored test.
pub async fn get_session(State(state): State<SharedState>) -> Json<SessionView> {
    Json(state.session.view().await)
}

/// GET /session/stream: SSE of the session view after every applied poll.
pub async fn session_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let initial = state.session.view().await;
    let rx = state.session.subscribe_views();

    let first = tokio_stream::once(initial);
    let updates = BroadcastStream::new(rx).filter_map(|result| result.ok());

    let events = first.chain(updates).map(|view| {
        let data = serde_json::to_string(&view).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().event("session").data(data))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// POST /session/select/{id}
pub async fn select_test(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<SessionView> {
    state.session.select(&id).await;
    Json(state.session.view().await)
}

/// POST /session/stop
pub async fn stop_session(State(state): State<SharedState>) -> Json<serde_json::Value> {
    state.session.stop().await;
    Json(serde_json::json!({ "stopped": true }))
}

/// POST /session/cancel
pub async fn cancel_test(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, MonitorError> {
    state.session.cancel().await?;
    Ok(Json(serde_json::json!({ "cancel_requested": true })))
}

/// GET /session/export: export document for the selected test.
pub async fn export_session(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, MonitorError> {
    let (id, current, history) = state
        .session
        .export_data()
        .await
        .ok_or(MonitorError::NoTestSelected)?;
    Ok(Json(handoff::export_document(&id, &current, &history)))
}
