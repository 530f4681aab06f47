//! AIClient - Detection/Tracking Provider Adapter
//!
//! ## Responsibilities
//!
//! - `Detector` contract used by the capture worker
//! - Tracked detection types and ground-contact projection
//! - HTTP client for the external tracking server (`/v1/track`)
//!
//! Model loading and identity assignment happen on the server. The allowed
//! class list is forwarded and also enforced here on every response.

use crate::capture_source::Frame;
use crate::error::{Error, Result};
use crate::geometry::Point;
use crate::lane_counter::TrackId;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::runtime::Handle;

/// Track id the server uses for boxes without an identity
pub const UNTRACKED: TrackId = -1;

/// Bounding box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// One tracked detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(flatten)]
    pub bbox: BBox,
    #[serde(default = "untracked")]
    pub track_id: TrackId,
    #[serde(rename = "conf")]
    pub confidence: f32,
    pub label: String,
}

fn untracked() -> TrackId {
    UNTRACKED
}

impl Detection {
    pub fn is_tracked(&self) -> bool {
        self.track_id >= 0
    }

    /// Bottom-centre of the box, where the vehicle touches the road
    pub fn ground_point(&self) -> Point {
        Point::new((self.bbox.x1 + self.bbox.x2) / 2.0, self.bbox.y2)
    }

    pub fn is_finite(&self) -> bool {
        [self.bbox.x1, self.bbox.y1, self.bbox.x2, self.bbox.y2]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Per-frame detection/tracking provider
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Tracking parameters sent alongside the image
#[derive(Debug, Serialize)]
struct TrackRequest<'a> {
    stream_id: &'a str,
    conf_threshold: f32,
    iou_threshold: f32,
    classes: &'a [String],
    /// keep tracker state between calls so ids stay stable
    persist: bool,
}

/// Tracking server response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackResponse {
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Thresholds forwarded with every frame
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub stream_id: String,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub allowed_classes: Vec<String>,
    pub timeout: Duration,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            stream_id: "main".to_string(),
            conf_threshold: 0.4,
            iou_threshold: 0.5,
            allowed_classes: ["car", "truck", "bus", "motorcycle"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP tracking client driven from the blocking capture thread
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
    options: DetectorOptions,
    runtime: Handle,
}

impl HttpDetector {
    /// `runtime` runs the requests; `detect` must not be called from inside it
    pub fn new(base_url: impl Into<String>, options: DetectorOptions, runtime: Handle) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(options.timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            options,
            runtime,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one frame to the tracking server
    pub async fn track(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let url = format!("{}/v1/track", self.base_url);

        let request = TrackRequest {
            stream_id: &self.options.stream_id,
            conf_threshold: self.options.conf_threshold,
            iou_threshold: self.options.iou_threshold,
            classes: &self.options.allowed_classes,
            persist: true,
        };

        let form = Form::new()
            .part(
                "image",
                Part::bytes(frame.data.clone())
                    .file_name(format!("frame_{}.jpg", frame.index))
                    .mime_str("image/jpeg")?,
            )
            .part(
                "request",
                Part::text(serde_json::to_string(&request)?).mime_str("application/json")?,
            );

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Detection(format!(
                "tracking server returned {} - {}",
                status, body
            )));
        }

        let body = resp.bytes().await?;
        let detections = parse_track_response(&body)?;
        Ok(self.retain_allowed(detections))
    }

    /// Drop detections whose label is not an allowed class
    fn retain_allowed(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
        let before = detections.len();
        detections.retain(|d| self.options.allowed_classes.iter().any(|c| *c == d.label));
        let dropped = before - detections.len();
        if dropped > 0 {
            tracing::debug!(dropped = dropped, kept = detections.len(), "Unlisted classes dropped");
        }
        detections
    }
}

impl Detector for HttpDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.runtime.block_on(self.track(frame))
    }
}

/// Decode a `/v1/track` body
pub fn parse_track_response(body: &[u8]) -> Result<Vec<Detection>> {
    let parsed: TrackResponse = serde_json::from_slice(body)
        .map_err(|e| Error::Detection(format!("malformed tracking response: {}", e)))?;
    Ok(parsed.detections)
}
