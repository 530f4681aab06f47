//! LaneCounter - Lane-Counting Engine
//!
//! ## Responsibilities
//!
//! - Per-identity state machine over (track id, ground point) observations
//! - Crossing detection against the counting line
//! - Lane attribution and at-most-once counting per identity
//!
//! The engine is owned by the capture worker and is not shared, so it holds no
//! locks. A crossing is attributed to the lane the object occupied on the
//! observation *before* the crossing: at the moment of crossing the ground
//! point sits on the lane boundary and may already be inside the other lane.

use crate::geometry::{has_crossed_line, signed_distance_to_line, Point};
use crate::lane_config::{Lane, LaneConfig};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Identity assigned by the tracker
pub type TrackId = i64;

/// Last observation of one identity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackState {
    /// Signed distance to the counting line
    pub distance: f64,
    /// Lane the ground point was in (None outside both polygons)
    pub lane: Option<Lane>,
    /// Frame index of the observation
    pub last_seen: u64,
}

/// LaneCounter instance
pub struct LaneCounter {
    config: Arc<LaneConfig>,
    tracks: HashMap<TrackId, TrackState>,
    /// Identities that already produced a count; never expired
    counted: HashSet<TrackId>,
    lane1_count: u64,
    lane2_count: u64,
    frame: u64,
    /// Drop track states unseen for more than this many frames
    max_idle_frames: Option<u64>,
}

impl LaneCounter {
    /// Create a counter that keeps every identity for its whole lifetime
    pub fn new(config: Arc<LaneConfig>) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
            counted: HashSet::new(),
            lane1_count: 0,
            lane2_count: 0,
            frame: 0,
            max_idle_frames: None,
        }
    }

    /// Create a counter that forgets track states idle for `max_idle_frames`.
    ///
    /// Only the position history is forgotten; a counted identity stays counted.
    pub fn with_idle_expiry(config: Arc<LaneConfig>, max_idle_frames: u64) -> Self {
        Self {
            max_idle_frames: Some(max_idle_frames),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &LaneConfig {
        &self.config
    }

    pub fn lane1_count(&self) -> u64 {
        self.lane1_count
    }

    pub fn lane2_count(&self) -> u64 {
        self.lane2_count
    }

    pub fn total(&self) -> u64 {
        self.lane1_count + self.lane2_count
    }

    /// Number of identities with stored state
    pub fn tracked(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_counted(&self, track_id: TrackId) -> bool {
        self.counted.contains(&track_id)
    }

    pub fn track_state(&self, track_id: TrackId) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    /// Feed one observation.
    ///
    /// Returns the lane credited when this observation completes a new crossing.
    pub fn update(&mut self, track_id: TrackId, ground_point: Point, class_name: &str) -> Option<Lane> {
        let curr_lane = self.config.lane_of(ground_point);
        let curr_distance = signed_distance_to_line(ground_point, &self.config.counting_line);

        let mut new_count = None;

        if let Some(prev) = self.tracks.get(&track_id) {
            if let Some(prev_lane) = prev.lane {
                if has_crossed_line(prev.distance, curr_distance, self.config.direction)
                    && self.counted.insert(track_id)
                {
                    match prev_lane {
                        Lane::One => self.lane1_count += 1,
                        Lane::Two => self.lane2_count += 1,
                    }
                    tracing::info!(
                        track_id = track_id,
                        lane = prev_lane.number(),
                        class_name = %class_name,
                        lane1 = self.lane1_count,
                        lane2 = self.lane2_count,
                        "Vehicle counted"
                    );
                    new_count = Some(prev_lane);
                }
            }
        }

        self.tracks.insert(
            track_id,
            TrackState {
                distance: curr_distance,
                lane: curr_lane,
                last_seen: self.frame,
            },
        );

        new_count
    }

    /// Close the current frame and expire idle track states if configured
    pub fn end_frame(&mut self) {
        self.frame += 1;

        if let Some(max_idle) = self.max_idle_frames {
            let frame = self.frame;
            let before = self.tracks.len();
            self.tracks
                .retain(|_, state| frame.saturating_sub(state.last_seen) <= max_idle);
            let expired = before - self.tracks.len();
            if expired > 0 {
                tracing::debug!(expired = expired, tracked = self.tracks.len(), "Idle tracks expired");
            }
        }
    }

    /// Clear all identities and counters
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.counted.clear();
        self.lane1_count = 0;
        self.lane2_count = 0;
        tracing::info!("Lane counter reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Direction, Line};

    fn counter() -> LaneCounter {
        LaneCounter::new(Arc::new(LaneConfig::default()))
    }

    fn p(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_first_observation_never_counts() {
        let mut c = counter();
        assert_eq!(c.update(7, p(480.0, 200.0), "car"), None);
        assert_eq!(c.total(), 0);
        assert_eq!(c.tracked(), 1);
    }

    #[test]
    fn test_crossing_counts_lane1() {
        let mut c = counter();
        assert_eq!(c.update(7, p(480.0, 200.0), "car"), None);
        assert_eq!(c.update(7, p(480.0, 400.0), "car"), Some(Lane::One));
        assert_eq!(c.lane1_count(), 1);
        assert_eq!(c.lane2_count(), 0);
        assert!(c.is_counted(7));
    }

    #[test]
    fn test_identity_counted_once() {
        let mut c = counter();
        c.update(7, p(480.0, 200.0), "car");
        c.update(7, p(480.0, 400.0), "car");

        assert_eq!(c.update(7, p(480.0, 200.0), "car"), None);
        assert_eq!(c.update(7, p(480.0, 400.0), "car"), None);
        assert_eq!(c.lane1_count(), 1);
    }

    #[test]
    fn test_distinct_identities_counted_separately() {
        let mut c = counter();
        for tid in [1, 2, 3] {
            c.update(tid, p(480.0, 200.0), "car");
            c.update(tid, p(480.0, 400.0), "car");
        }
        assert_eq!(c.lane1_count(), 3);
        assert_eq!(c.lane2_count(), 0);
        assert_eq!(c.total(), 3);
    }

    #[test]
    fn test_upward_crossing_counts_lane2() {
        let mut c = counter();
        c.update(10, p(480.0, 500.0), "truck");
        assert_eq!(c.update(10, p(480.0, 300.0), "truck"), Some(Lane::Two));
        assert_eq!(c.lane2_count(), 1);
        assert_eq!(c.lane1_count(), 0);
    }

    #[test]
    fn test_attribution_uses_lane_before_crossing() {
        // side-by-side lanes split at x=480, horizontal counting line at y=360
        let config = LaneConfig::new(
            vec![p(0.0, 0.0), p(480.0, 0.0), p(480.0, 720.0), p(0.0, 720.0)],
            vec![p(480.0, 0.0), p(960.0, 0.0), p(960.0, 720.0), p(480.0, 720.0)],
            Line::new(p(0.0, 360.0), p(960.0, 360.0)),
            Direction::Any,
        );
        let mut c = LaneCounter::new(Arc::new(config));

        // drifts from lane 1 into lane 2 while crossing the line
        c.update(4, p(400.0, 340.0), "car");
        assert_eq!(c.update(4, p(560.0, 380.0), "car"), Some(Lane::One));
        assert_eq!(c.lane1_count(), 1);
        assert_eq!(c.lane2_count(), 0);
    }

    #[test]
    fn test_no_count_when_previous_point_outside_lanes() {
        let config = LaneConfig::new(
            vec![p(100.0, 0.0), p(400.0, 0.0), p(400.0, 720.0), p(100.0, 720.0)],
            vec![p(500.0, 0.0), p(900.0, 0.0), p(900.0, 720.0), p(500.0, 720.0)],
            Line::new(p(0.0, 360.0), p(960.0, 360.0)),
            Direction::Any,
        );
        let mut c = LaneCounter::new(Arc::new(config));

        // x=450 is between the two lanes
        c.update(9, p(450.0, 300.0), "car");
        assert_eq!(c.update(9, p(450.0, 400.0), "car"), None);
        assert!(!c.is_counted(9));

        // crossing back from inside lane 1 still counts: identity was never counted
        c.update(9, p(200.0, 300.0), "car");
        assert_eq!(c.update(9, p(200.0, 400.0), "car"), Some(Lane::One));
    }

    #[test]
    fn test_direction_policy() {
        let config = LaneConfig {
            direction: Direction::Negative,
            ..LaneConfig::default()
        };
        let mut c = LaneCounter::new(Arc::new(config));

        // downward: negative -> positive distance, rejected
        c.update(1, p(480.0, 200.0), "car");
        assert_eq!(c.update(1, p(480.0, 400.0), "car"), None);

        // upward: positive -> negative distance, accepted
        c.update(2, p(480.0, 500.0), "car");
        assert_eq!(c.update(2, p(480.0, 300.0), "car"), Some(Lane::Two));

        // a rejected crossing does not consume the identity
        assert_eq!(c.update(1, p(480.0, 300.0), "car"), Some(Lane::Two));
        assert_eq!(c.total(), 2);
    }

    #[test]
    fn test_first_observation_on_line_is_noop() {
        let mut c = counter();
        assert_eq!(c.update(5, p(480.0, 360.0), "car"), None);
        let state = c.track_state(5).unwrap();
        assert_eq!(state.distance, 0.0);

        // zero prior distance can't confirm a crossing
        assert_eq!(c.update(5, p(480.0, 400.0), "car"), None);
        assert_eq!(c.total(), 0);
    }

    #[test]
    fn test_state_stored_even_when_counting() {
        let mut c = counter();
        c.update(3, p(480.0, 200.0), "car");
        c.update(3, p(480.0, 400.0), "car");
        let state = c.track_state(3).unwrap();
        assert_eq!(state.lane, Some(Lane::Two));
        assert!(state.distance > 0.0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut c = counter();
        c.update(1, p(480.0, 200.0), "car");
        c.update(1, p(480.0, 400.0), "car");
        assert_eq!(c.lane1_count(), 1);

        c.reset();
        assert_eq!(c.lane1_count(), 0);
        assert_eq!(c.lane2_count(), 0);
        assert_eq!(c.total(), 0);
        assert_eq!(c.tracked(), 0);

        // the identity may count again after a reset
        c.update(1, p(480.0, 200.0), "car");
        assert_eq!(c.update(1, p(480.0, 400.0), "car"), Some(Lane::One));
    }

    #[test]
    fn test_idle_expiry_keeps_dedup() {
        let mut c = LaneCounter::with_idle_expiry(Arc::new(LaneConfig::default()), 2);
        c.update(1, p(480.0, 200.0), "car");
        c.end_frame();
        c.update(1, p(480.0, 400.0), "car");
        c.update(2, p(480.0, 200.0), "car");
        c.end_frame();
        assert_eq!(c.lane1_count(), 1);

        for _ in 0..3 {
            c.end_frame();
        }
        assert_eq!(c.tracked(), 0);

        // same id reappears: no history, then a crossing, still not recounted
        c.update(1, p(480.0, 200.0), "car");
        c.end_frame();
        assert_eq!(c.update(1, p(480.0, 400.0), "car"), None);
        assert_eq!(c.lane1_count(), 1);
    }

    #[test]
    fn test_without_expiry_tracks_are_kept() {
        let mut c = counter();
        c.update(1, p(480.0, 200.0), "car");
        for _ in 0..100 {
            c.end_frame();
        }
        assert_eq!(c.tracked(), 1);
    }
}
