//! WebAPI - Read-only HTTP Surface
//!
//! ## Responsibilities
//!
//! - Live counts and stream status (`CountState` snapshots)
//! - Latest frame and durable count history
//! - HTML dashboard
//!
//! Handlers never write; the capture worker is the only producer.

mod dashboard;
mod routes;

pub use dashboard::render_dashboard;
pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        stream_status: state.counts.status(),
    };

    Json(response)
}
