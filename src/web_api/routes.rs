//! API Routes

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::count_log_service::CountTotals;
use crate::error::Result;
use crate::models::EventsResponse;
use crate::state::AppState;

const DEFAULT_EVENTS_LIMIT: u32 = 50;
const MAX_EVENTS_LIMIT: u32 = 1000;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/healthz", get(super::health_check))
        // Live state
        .route("/api/stats", get(stats))
        .route("/api/frame", get(latest_frame))
        .route("/api/lanes", get(lane_geometry))
        // Count log (durable)
        .route("/api/totals", get(totals))
        .route("/api/events", get(list_events))
        .with_state(state)
}

async fn dashboard(State(state): State<AppState>) -> Html<String> {
    Html(super::render_dashboard(&state.counts.snapshot()))
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.counts.snapshot())
}

async fn latest_frame(State(state): State<AppState>) -> Response {
    match state.counts.latest_frame() {
        Some(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            ],
            bytes,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error_code": "NO_FRAME",
                "message": "No frame available yet. The worker may be connecting to the camera or the stream is unavailable.",
                "stream_status": state.counts.status(),
            })),
        )
            .into_response(),
    }
}

async fn lane_geometry(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.lane_config.as_ref().clone())
}

async fn totals(State(state): State<AppState>) -> Result<Json<CountTotals>> {
    Ok(Json(state.count_log.totals().await?))
}

/// Query parameters for the count log
#[derive(Deserialize)]
struct EventQuery {
    limit: Option<u32>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Json<EventsResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENTS_LIMIT)
        .clamp(1, MAX_EVENTS_LIMIT);

    let events = state.count_log.recent(limit).await?;

    Ok(Json(EventsResponse {
        limit,
        count: events.len(),
        events,
    }))
}
