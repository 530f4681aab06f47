//! Geometry - Lane Geometry Primitives
//!
//! ## Responsibilities
//!
//! - Point / Polygon / Line types in frame coordinates
//! - Point-in-polygon lane membership (even-odd ray casting)
//! - Signed distance to the oriented counting line
//! - Crossing predicate with direction policy

use serde::{Deserialize, Serialize};

/// Point in frame space (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Lane region. Vertex order only has to be consistent (either winding works).
pub type Polygon = Vec<Point>;

/// Oriented counting line; swapping `start` and `end` flips every distance sign
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[Point; 2]", into = "[Point; 2]")]
pub struct Line {
    pub start: Point,
    pub end: Point,
}

impl Line {
    pub const fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Same line with the opposite orientation
    pub fn reversed(&self) -> Self {
        Self {
            start: self.end,
            end: self.start,
        }
    }
}

impl From<[Point; 2]> for Line {
    fn from([start, end]: [Point; 2]) -> Self {
        Self { start, end }
    }
}

impl From<Line> for [Point; 2] {
    fn from(line: Line) -> Self {
        [line.start, line.end]
    }
}

/// Which sign flips count as a crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Either flip
    #[default]
    Any,
    /// Negative side to positive side only
    Positive,
    /// Positive side to negative side only
    Negative,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Any => "any",
            Direction::Positive => "positive",
            Direction::Negative => "negative",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(Direction::Any),
            "positive" => Ok(Direction::Positive),
            "negative" => Ok(Direction::Negative),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Ray-casting containment test.
///
/// A horizontal ray is cast from `point`; an odd number of edge crossings means
/// inside. Points exactly on a vertex or edge get a deterministic answer, which
/// may be either value. Polygons with fewer than three vertices contain nothing.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        // the straddle check guarantees pj.y != pi.y, so the division is safe
        if (pi.y > point.y) != (pj.y > point.y) {
            let x_cross = (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Cross product of (end - start) and (point - start).
///
/// Not normalised by the line length: only the sign and zero are used.
pub fn signed_distance_to_line(point: Point, line: &Line) -> f64 {
    let (a, b) = (line.start, line.end);
    (b.x - a.x) * (point.y - a.y) - (b.y - a.y) * (point.x - a.x)
}

/// True when `prev -> curr` is a sign flip allowed by `direction`.
///
/// A reading of exactly zero (on the line) never triggers or confirms a crossing.
pub fn has_crossed_line(prev: f64, curr: f64, direction: Direction) -> bool {
    if prev == 0.0 || curr == 0.0 {
        return false;
    }
    if (prev > 0.0) == (curr > 0.0) {
        return false;
    }
    match direction {
        Direction::Any => true,
        Direction::Positive => prev < 0.0 && curr > 0.0,
        Direction::Negative => prev > 0.0 && curr < 0.0,
    }
}
