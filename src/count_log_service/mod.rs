//! CountLogService - Durable Count Log
//!
//! ## Responsibilities
//!
//! - Hand count events from the capture worker to a background writer
//!   (bounded channel, submit never blocks)
//! - Persist events to SQLite (`count_events` table)
//! - Aggregate and recent-history queries for audit
//!
//! The live view is `CountState`; this log is for history reconstruction only,
//! so a failed or dropped write is logged and otherwise ignored.

use crate::count_state::CountEvent;
use crate::error::{Error, Result};
use crate::lane_config::Lane;
use crate::lane_counter::TrackId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS count_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ts          TEXT    NOT NULL,
    lane        INTEGER NOT NULL,
    track_id    INTEGER NOT NULL,
    class_name  TEXT    NOT NULL
)
"#;

/// Stored count event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountRecord {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub lane: Lane,
    pub track_id: TrackId,
    pub class_name: String,
}

/// Per-lane totals from the durable log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountTotals {
    pub lane1: u64,
    pub lane2: u64,
    pub total: u64,
}

// ============================================================
// Repository
// ============================================================

/// count_events repository
#[derive(Clone)]
pub struct CountLogRepository {
    pool: SqlitePool,
}

impl CountLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the SQLite database at `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        tracing::info!(database_url = %database_url, "Count log database connected");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the count_events table if it does not exist
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Append one event, returning its row id
    pub async fn insert(&self, event: &CountEvent) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO count_events (ts, lane, track_id, class_name) VALUES (?, ?, ?, ?)",
        )
        .bind(event.timestamp.to_rfc3339())
        .bind(i64::from(event.lane.number()))
        .bind(event.track_id)
        .bind(&event.class_name)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Persistence(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    /// Per-lane totals over the whole log
    pub async fn totals(&self) -> Result<CountTotals> {
        let rows = sqlx::query("SELECT lane, COUNT(*) AS n FROM count_events GROUP BY lane")
            .fetch_all(&self.pool)
            .await?;

        let mut totals = CountTotals::default();
        for row in rows {
            let lane: i64 = row.get("lane");
            let n: i64 = row.get("n");
            match lane {
                1 => totals.lane1 = n as u64,
                2 => totals.lane2 = n as u64,
                other => tracing::warn!(lane = other, "Ignoring rows with unknown lane"),
            }
        }
        totals.total = totals.lane1 + totals.lane2;
        Ok(totals)
    }

    /// Most recent events, newest first
    pub async fn recent(&self, limit: u32) -> Result<Vec<CountRecord>> {
        let rows = sqlx::query(
            "SELECT id, ts, lane, track_id, class_name FROM count_events ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<CountRecord> {
                let ts: String = row.get("ts");
                let lane: i64 = row.get("lane");
                let ts = DateTime::parse_from_rfc3339(&ts)
                    .map_err(|e| Error::Persistence(format!("bad timestamp '{}': {}", ts, e)))?
                    .with_timezone(&Utc);
                let lane = u8::try_from(lane)
                    .ok()
                    .and_then(|n| Lane::try_from(n).ok())
                    .ok_or_else(|| Error::Persistence(format!("bad lane {}", lane)))?;

                Ok(CountRecord {
                    id: row.get("id"),
                    ts,
                    lane,
                    track_id: row.get("track_id"),
                    class_name: row.get("class_name"),
                })
            })
            .collect()
    }
}

// ============================================================
// Persistence bridge
// ============================================================

/// Sending half of the persistence queue, held by the capture worker
#[derive(Clone)]
pub struct CountLogService {
    tx: mpsc::Sender<CountEvent>,
}

impl CountLogService {
    /// Bare queue; the caller drains the receiver
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CountEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue plus a writer task on the current tokio runtime.
    ///
    /// The task ends once every `CountLogService` clone is dropped.
    pub fn spawn(repository: CountLogRepository, capacity: usize) -> (Self, JoinHandle<()>) {
        let (service, rx) = Self::channel(capacity);
        let handle = tokio::spawn(Self::consume(repository, rx));
        tracing::info!(capacity = capacity, "Count log writer started");
        (service, handle)
    }

    /// Drain the queue into the repository
    pub async fn consume(repository: CountLogRepository, mut rx: mpsc::Receiver<CountEvent>) {
        while let Some(event) = rx.recv().await {
            match repository.insert(&event).await {
                Ok(id) => {
                    tracing::debug!(
                        id = id,
                        track_id = event.track_id,
                        lane = event.lane.number(),
                        "Count event persisted"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        track_id = event.track_id,
                        lane = event.lane.number(),
                        "Failed to persist count event"
                    );
                }
            }
        }
        tracing::info!("Count log writer stopped");
    }

    /// Queue an event without waiting. Returns false when it was dropped.
    pub fn submit(&self, event: CountEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    track_id = event.track_id,
                    lane = event.lane.number(),
                    "Count log queue full, event not persisted"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                tracing::error!(
                    track_id = event.track_id,
                    lane = event.lane.number(),
                    "Count log writer gone, event not persisted"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_repo() -> CountLogRepository {
        let repo = CountLogRepository::connect("sqlite::memory:", 1).await.unwrap();
        repo.init_schema().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_insert_and_totals() {
        let repo = memory_repo().await;
        assert_eq!(repo.totals().await.unwrap(), CountTotals::default());

        let first = repo.insert(&CountEvent::new(Lane::One, 1, "car")).await.unwrap();
        let second = repo.insert(&CountEvent::new(Lane::One, 2, "bus")).await.unwrap();
        repo.insert(&CountEvent::new(Lane::Two, 3, "truck")).await.unwrap();
        assert!(second > first);

        let totals = repo.totals().await.unwrap();
        assert_eq!(totals, CountTotals { lane1: 2, lane2: 1, total: 3 });
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let repo = memory_repo().await;
        for id in 1..=4 {
            repo.insert(&CountEvent::new(Lane::Two, id, "car")).await.unwrap();
        }

        let recent = repo.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].track_id, 4);
        assert_eq!(recent[1].track_id, 3);
        assert_eq!(recent[0].lane, Lane::Two);
        assert_eq!(recent[0].class_name, "car");
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let repo = memory_repo().await;
        repo.init_schema().await.unwrap();
        repo.insert(&CountEvent::new(Lane::One, 1, "car")).await.unwrap();
        assert_eq!(repo.totals().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_bridge_persists_submitted_events() {
        let repo = memory_repo().await;
        let (service, handle) = CountLogService::spawn(repo.clone(), 8);

        assert!(service.submit(CountEvent::new(Lane::One, 10, "car")));
        assert!(service.submit(CountEvent::new(Lane::Two, 11, "car")));
        assert!(service.submit(CountEvent::new(Lane::Two, 12, "motorcycle")));

        drop(service);
        handle.await.unwrap();

        let totals = repo.totals().await.unwrap();
        assert_eq!(totals, CountTotals { lane1: 1, lane2: 2, total: 3 });
    }

    #[tokio::test]
    async fn test_submit_on_full_queue_does_not_block() {
        let (service, mut rx) = CountLogService::channel(1);
        assert!(service.submit(CountEvent::new(Lane::One, 1, "car")));
        assert!(!service.submit(CountEvent::new(Lane::One, 2, "car")));

        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.track_id, 1);
    }

    #[tokio::test]
    async fn test_submit_after_writer_gone() {
        let (service, rx) = CountLogService::channel(4);
        drop(rx);
        assert!(!service.submit(CountEvent::new(Lane::Two, 1, "car")));
    }
}
