//! HTTP response bodies

use crate::count_log_service::CountRecord;
use crate::count_state::StreamStatus;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub stream_status: StreamStatus,
}

/// Durable count history page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsResponse {
    pub limit: u32,
    pub count: usize,
    pub events: Vec<CountRecord>,
}
