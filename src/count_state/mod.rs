//! CountState - Shared Published State
//!
//! ## Responsibilities
//!
//! - Live lane counts and stream status for readers
//! - Recent count events (ring buffer, oldest evicted first)
//! - Latest frame payload for the presentation layer
//!
//! Every operation runs under a single mutex, so a snapshot never observes a
//! half-applied publish. The capture worker is the only writer.

use crate::lane_config::Lane;
use crate::lane_counter::TrackId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Stream status as published to readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// Worker has not published yet
    Starting,
    /// Frames are flowing
    Streaming,
    /// Read failed, handle released, reopening shortly
    Reconnecting,
    /// Open failed, waiting out the backoff
    Disconnected,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Starting => "starting",
            StreamStatus::Streaming => "streaming",
            StreamStatus::Reconnecting => "reconnecting",
            StreamStatus::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A counted crossing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountEvent {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub lane: Lane,
    pub track_id: TrackId,
    pub class_name: String,
}

impl CountEvent {
    pub fn new(lane: Lane, track_id: TrackId, class_name: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            lane,
            track_id,
            class_name: class_name.into(),
        }
    }
}

/// Consistent copy of the published state
#[derive(Debug, Clone, Serialize)]
pub struct CountSnapshot {
    pub lane1: u64,
    pub lane2: u64,
    pub total: u64,
    pub stream_status: StreamStatus,
    pub last_update: Option<DateTime<Utc>>,
    pub uptime_seconds: f64,
    pub recent_events: Vec<CountEvent>,
}

/// Ring buffer for recent events
struct EventRingBuffer {
    events: VecDeque<CountEvent>,
    capacity: usize,
}

impl EventRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, event: CountEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

struct Published {
    lane1: u64,
    lane2: u64,
    total: u64,
    status: StreamStatus,
    last_update: Option<DateTime<Utc>>,
    latest_frame: Option<Vec<u8>>,
    history: EventRingBuffer,
}

/// CountState instance
pub struct CountState {
    inner: Mutex<Published>,
    started_at: Instant,
}

impl CountState {
    /// Create new CountState keeping at most `history_capacity` recent events
    pub fn new(history_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Published {
                lane1: 0,
                lane2: 0,
                total: 0,
                status: StreamStatus::Starting,
                last_update: None,
                latest_frame: None,
                history: EventRingBuffer::new(history_capacity),
            }),
            started_at: Instant::now(),
        }
    }

    // Every write replaces whole fields, so state behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Published> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace counts, status and last-update time; replace the frame when given
    pub fn publish(&self, lane1: u64, lane2: u64, status: StreamStatus, frame: Option<Vec<u8>>) {
        let mut inner = self.lock();
        inner.lane1 = lane1;
        inner.lane2 = lane2;
        inner.total = lane1 + lane2;
        inner.status = status;
        inner.last_update = Some(Utc::now());
        if let Some(frame) = frame {
            inner.latest_frame = Some(frame);
        }
    }

    /// Append a count event to the recent history
    pub fn record_event(&self, lane: Lane, track_id: TrackId, class_name: &str) -> CountEvent {
        let event = CountEvent::new(lane, track_id, class_name);
        self.lock().history.push(event.clone());
        tracing::debug!(track_id = track_id, lane = lane.number(), "Event added to ring buffer");
        event
    }

    /// Consistent copy of every published field
    pub fn snapshot(&self) -> CountSnapshot {
        let uptime = self.started_at.elapsed().as_secs_f64();
        let inner = self.lock();
        CountSnapshot {
            lane1: inner.lane1,
            lane2: inner.lane2,
            total: inner.total,
            stream_status: inner.status,
            last_update: inner.last_update,
            uptime_seconds: (uptime * 10.0).round() / 10.0,
            recent_events: inner.history.events.iter().cloned().collect(),
        }
    }

    /// Copy of the latest frame payload
    pub fn latest_frame(&self) -> Option<Vec<u8>> {
        self.lock().latest_frame.clone()
    }

    pub fn status(&self) -> StreamStatus {
        self.lock().status
    }
}

impl Default for CountState {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_snapshot() {
        let state = CountState::new(10);
        let snap = state.snapshot();
        assert_eq!(snap.total, 0);
        assert_eq!(snap.stream_status, StreamStatus::Starting);
        assert!(snap.last_update.is_none());
        assert!(snap.recent_events.is_empty());
        assert!(state.latest_frame().is_none());
    }

    #[test]
    fn test_publish_replaces_fields() {
        let state = CountState::new(10);
        state.publish(3, 4, StreamStatus::Streaming, Some(vec![1, 2, 3]));

        let snap = state.snapshot();
        assert_eq!((snap.lane1, snap.lane2, snap.total), (3, 4, 7));
        assert_eq!(snap.stream_status, StreamStatus::Streaming);
        assert!(snap.last_update.is_some());
        assert_eq!(state.latest_frame(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_publish_without_frame_keeps_previous_frame() {
        let state = CountState::new(10);
        state.publish(0, 0, StreamStatus::Streaming, Some(vec![9]));
        state.publish(1, 0, StreamStatus::Reconnecting, None);
        assert_eq!(state.latest_frame(), Some(vec![9]));
        assert_eq!(state.status(), StreamStatus::Reconnecting);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let state = CountState::new(3);
        for id in 1..=5 {
            state.record_event(Lane::One, id, "car");
        }

        let ids: Vec<_> = state.snapshot().recent_events.iter().map(|e| e.track_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let state = CountState::new(0);
        state.record_event(Lane::Two, 1, "bus");
        assert!(state.snapshot().recent_events.is_empty());
    }

    #[test]
    fn test_snapshot_serializes_like_stats_payload() {
        let state = CountState::new(5);
        state.record_event(Lane::Two, 42, "truck");
        state.publish(0, 1, StreamStatus::Streaming, None);

        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["lane2"], 1);
        assert_eq!(json["total"], 1);
        assert_eq!(json["stream_status"], "streaming");
        assert_eq!(json["recent_events"][0]["lane"], 2);
        assert_eq!(json["recent_events"][0]["track_id"], 42);
        assert!(json["recent_events"][0]["ts"].is_string());
    }

    #[test]
    fn test_concurrent_snapshots_are_consistent() {
        let state = Arc::new(CountState::new(50));

        let writer = {
            let state = state.clone();
            thread::spawn(move || {
                let (mut lane1, mut lane2) = (0u64, 0u64);
                for i in 0..1000u64 {
                    if i % 2 == 0 {
                        lane1 += 1;
                        state.record_event(Lane::One, i as TrackId, "car");
                    } else {
                        lane2 += 3;
                        state.record_event(Lane::Two, i as TrackId, "bus");
                    }
                    state.publish(lane1, lane2, StreamStatus::Streaming, None);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let snap = state.snapshot();
                        assert_eq!(snap.lane1 + snap.lane2, snap.total);
                        assert!(snap.recent_events.len() <= 50);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        let snap = state.snapshot();
        assert_eq!(snap.total, 500 + 1500);
        assert_eq!(snap.recent_events.len(), 50);
        assert_eq!(snap.recent_events.last().map(|e| e.track_id), Some(999));
    }
}
