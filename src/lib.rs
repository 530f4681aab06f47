//! Lane Counter Library
//!
//! Two-lane vehicle counter over a tracked RTSP stream.
//!
//! ## Architecture
//!
//! 1. Geometry - point-in-polygon, signed line distance, crossing predicate
//! 2. LaneConfig - lane polygons and counting line
//! 3. LaneCounter - per-identity crossing engine, at-most-once counting
//! 4. CountState - shared published counts, status, frame, recent events
//! 5. CaptureSource - blocking RTSP frame source (ffmpeg)
//! 6. AIClient - detection/tracking provider
//! 7. CaptureWorker - frame loop with reconnect backoff
//! 8. CountLogService - bounded hand-off to the SQLite count log
//! 9. WebAPI - read-only HTTP surface and dashboard

pub mod ai_client;
pub mod capture_source;
pub mod capture_worker;
pub mod count_log_service;
pub mod count_state;
pub mod error;
pub mod geometry;
pub mod lane_config;
pub mod lane_counter;
pub mod models;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
