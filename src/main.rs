//! Lane Counter - two-lane vehicle counting service
//!
//! Main entry point: capture worker thread plus the read-only HTTP server.

use lane_counter::{
    ai_client::{DetectorOptions, HttpDetector},
    capture_source::FfmpegSource,
    capture_worker::CaptureWorker,
    count_log_service::{CountLogRepository, CountLogService},
    count_state::CountState,
    lane_config::LaneConfig,
    lane_counter::LaneCounter,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lane_counter=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Lane Counter v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    config.validate()?;
    tracing::info!(
        camera_rtsp_url = %config.camera_url_for_log(),
        detector_url = %config.detector_url,
        database_url = %config.database_url,
        allowed_classes = ?config.allowed_classes,
        "Configuration loaded"
    );

    let lane_config = LaneConfig::load(config.lane_config_path.as_deref())?;
    lane_config.validate()?;
    let lane_config = Arc::new(lane_config);
    tracing::info!(
        direction = %lane_config.direction,
        lane1_vertices = lane_config.lane1_polygon.len(),
        lane2_vertices = lane_config.lane2_polygon.len(),
        "Lane geometry loaded"
    );

    // Count log
    let count_log = CountLogRepository::connect(&config.database_url, 5).await?;
    count_log.init_schema().await?;
    let (count_log_service, _writer) =
        CountLogService::spawn(count_log.clone(), config.persist_queue_capacity);

    // Shared published state
    let counts = Arc::new(CountState::new(config.recent_events_limit));

    // Capture worker
    let source = FfmpegSource::new(config.camera_rtsp_url.clone());
    let detector = HttpDetector::new(
        config.detector_url.clone(),
        DetectorOptions {
            conf_threshold: config.conf_threshold,
            iou_threshold: config.iou_threshold,
            allowed_classes: config.allowed_classes.clone(),
            ..DetectorOptions::default()
        },
        tokio::runtime::Handle::current(),
    )?;
    let counter = match config.track_idle_frames {
        Some(frames) => LaneCounter::with_idle_expiry(lane_config.clone(), frames),
        None => LaneCounter::new(lane_config.clone()),
    };
    CaptureWorker::new(
        source,
        detector,
        counter,
        counts.clone(),
        count_log_service,
        config.retry_policy(),
    )
    .spawn()?;
    tracing::info!("Capture worker thread started");

    let state = AppState {
        config,
        lane_config,
        counts,
        count_log,
    };

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
