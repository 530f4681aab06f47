//! LaneConfig - Lane Geometry Configuration
//!
//! ## Responsibilities
//!
//! - Lane polygons, counting line and direction policy
//! - Loading from YAML/JSON files (default geometry otherwise)
//! - One-time validation before the worker starts
//!
//! The config is read-only once built; share it as `Arc<LaneConfig>`.

use crate::error::{Error, Result};
use crate::geometry::{point_in_polygon, Direction, Line, Point, Polygon};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lane a count is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Lane {
    One,
    Two,
}

impl Lane {
    pub fn number(&self) -> u8 {
        match self {
            Lane::One => 1,
            Lane::Two => 2,
        }
    }
}

impl From<Lane> for u8 {
    fn from(lane: Lane) -> Self {
        lane.number()
    }
}

impl TryFrom<u8> for Lane {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Lane::One),
            2 => Ok(Lane::Two),
            other => Err(format!("invalid lane number {}", other)),
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Parsed lane geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneConfig {
    pub lane1_polygon: Polygon,
    pub lane2_polygon: Polygon,
    pub counting_line: Line,
    #[serde(default)]
    pub direction: Direction,
}

impl LaneConfig {
    pub fn new(
        lane1_polygon: Polygon,
        lane2_polygon: Polygon,
        counting_line: Line,
        direction: Direction,
    ) -> Self {
        Self {
            lane1_polygon,
            lane2_polygon,
            counting_line,
            direction,
        }
    }

    /// Load from a `.yaml`/`.yml` or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: LaneConfig = if is_yaml {
            serde_yaml::from_str(&contents)?
        } else {
            serde_json::from_str(&contents)?
        };

        tracing::info!(
            path = %path.display(),
            direction = %config.direction,
            "Lane config loaded from file"
        );
        Ok(config)
    }

    /// File config when `path` is set and exists, default geometry otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.is_file() => Self::from_file(p),
            Some(p) => {
                tracing::warn!(
                    path = %p.display(),
                    "Lane config file not found, using default geometry"
                );
                Ok(Self::default())
            }
            None => {
                tracing::info!("No lane config path set, using default geometry");
                Ok(Self::default())
            }
        }
    }

    /// Reject geometry the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        for (name, polygon) in [
            ("lane1_polygon", &self.lane1_polygon),
            ("lane2_polygon", &self.lane2_polygon),
        ] {
            if polygon.len() < 3 {
                return Err(Error::Config(format!(
                    "{} needs at least 3 vertices, got {}",
                    name,
                    polygon.len()
                )));
            }
            if let Some(p) = polygon.iter().find(|p| !p.is_finite()) {
                return Err(Error::Config(format!(
                    "{} has a non-finite vertex ({}, {})",
                    name, p.x, p.y
                )));
            }
        }

        let line = &self.counting_line;
        if !line.start.is_finite() || !line.end.is_finite() {
            return Err(Error::Config("counting_line has a non-finite endpoint".to_string()));
        }
        if line.start == line.end {
            return Err(Error::Config(
                "counting_line endpoints must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Lane containing `point`; lane 1 wins where the polygons overlap
    pub fn lane_of(&self, point: Point) -> Option<Lane> {
        if point_in_polygon(point, &self.lane1_polygon) {
            Some(Lane::One)
        } else if point_in_polygon(point, &self.lane2_polygon) {
            Some(Lane::Two)
        } else {
            None
        }
    }
}

impl Default for LaneConfig {
    /// 960x720 frame split into stacked lanes, counting line at y=360
    fn default() -> Self {
        Self {
            lane1_polygon: vec![
                Point::new(0.0, 0.0),
                Point::new(960.0, 0.0),
                Point::new(960.0, 360.0),
                Point::new(0.0, 360.0),
            ],
            lane2_polygon: vec![
                Point::new(0.0, 360.0),
                Point::new(960.0, 360.0),
                Point::new(960.0, 720.0),
                Point::new(0.0, 720.0),
            ],
            counting_line: Line::new(Point::new(0.0, 360.0), Point::new(960.0, 360.0)),
            direction: Direction::Any,
        }
    }
}
