//! CaptureWorker - Frame Processing Loop
//!
//! ## Responsibilities
//!
//! - Open / read / release the video source with capped exponential backoff
//! - Per frame: detect, feed tracked ground points to the LaneCounter,
//!   record and persist new counts
//! - Publish counts, stream status and the latest frame to CountState
//!
//! The worker runs on its own OS thread and never terminates; every runtime
//! failure becomes a status change plus a wait.

use crate::ai_client::Detector;
use crate::capture_source::VideoSource;
use crate::count_log_service::CountLogService;
use crate::count_state::{CountState, StreamStatus};
use crate::error::Result;
use crate::lane_counter::LaneCounter;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Wait times between connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound for the open-failure backoff
    pub max_backoff: Duration,
    /// Fixed pause after a read failure before reopening
    pub reconnect_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_backoff: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// `min(max, 2^failures)` seconds
pub fn backoff_delay(failures: u32, max: Duration) -> Duration {
    let secs = 2u64.checked_pow(failures).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(max)
}

/// Outcome of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A frame went through detection; `counted` new crossings
    Processed { counted: usize },
    /// Nothing processed, sleep before the next iteration
    Wait(Duration),
}

/// CaptureWorker instance
pub struct CaptureWorker<S, D> {
    source: S,
    detector: D,
    counter: LaneCounter,
    state: Arc<CountState>,
    count_log: CountLogService,
    policy: RetryPolicy,
    failures: u32,
}

impl<S: VideoSource, D: Detector> CaptureWorker<S, D> {
    pub fn new(
        source: S,
        detector: D,
        counter: LaneCounter,
        state: Arc<CountState>,
        count_log: CountLogService,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            source,
            detector,
            counter,
            state,
            count_log,
            policy,
            failures: 0,
        }
    }

    /// Consecutive open failures since the last good frame
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn counter(&self) -> &LaneCounter {
        &self.counter
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn publish(&self, status: StreamStatus, frame: Option<Vec<u8>>) {
        self.state.publish(
            self.counter.lane1_count(),
            self.counter.lane2_count(),
            status,
            frame,
        );
    }

    /// Run one iteration of the loop
    pub fn step(&mut self) -> Step {
        if !self.source.is_open() {
            if let Err(e) = self.source.open() {
                self.failures = self.failures.saturating_add(1);
                let delay = backoff_delay(self.failures, self.policy.max_backoff);
                tracing::warn!(
                    error = %e,
                    failures = self.failures,
                    delay_secs = delay.as_secs(),
                    "Failed to open stream, retrying"
                );
                self.publish(StreamStatus::Disconnected, None);
                return Step::Wait(delay);
            }
            tracing::info!(failures = self.failures, "Stream connected");
        }

        let frame = match self.source.read() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    delay_ms = self.policy.reconnect_delay.as_millis() as u64,
                    "Frame read failed, reconnecting"
                );
                self.source.release();
                self.publish(StreamStatus::Reconnecting, None);
                return Step::Wait(self.policy.reconnect_delay);
            }
        };
        self.failures = 0;

        let detections = match self.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(error = %e, frame = frame.index, "Detection failed, frame skipped");
                Vec::new()
            }
        };

        let mut counted = 0;
        for det in detections.iter().filter(|d| d.is_tracked() && d.is_finite()) {
            if let Some(lane) = self.counter.update(det.track_id, det.ground_point(), &det.label) {
                let event = self.state.record_event(lane, det.track_id, &det.label);
                self.count_log.submit(event);
                counted += 1;
            }
        }
        self.counter.end_frame();

        self.publish(StreamStatus::Streaming, Some(frame.data));
        Step::Processed { counted }
    }

    /// Loop forever, sleeping whenever a step asks to wait
    pub fn run(mut self) {
        tracing::info!(
            max_backoff_secs = self.policy.max_backoff.as_secs(),
            "Capture worker started"
        );
        loop {
            if let Step::Wait(delay) = self.step() {
                thread::sleep(delay);
            }
        }
    }
}

impl<S, D> CaptureWorker<S, D>
where
    S: VideoSource + 'static,
    D: Detector + 'static,
{
    /// Start `run()` on a dedicated `capture-worker` thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("capture-worker".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }
}
