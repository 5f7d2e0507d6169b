//! # Lane Map
//!
//! Lane centrelines used by the behaviour policies. The map resource is a CSV file with one row
//! per centreline point (`lane_id,x,y`) given in the global frame; points are shifted into the
//! local frame with the same offsets used by the [`FrameConverter`](crate::frame::FrameConverter)
//! when loaded.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{fs::File, io::Read, path::Path};

use log::debug;
use nalgebra::{Point2, Vector2};
use serde::Deserialize;

use crate::frame::FrameOffsets;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A set of lane centrelines in the local frame.
#[derive(Debug, Clone)]
pub struct LaneMap {
    lanes: Vec<Lane>,
}

/// A single lane centreline, as a polyline.
#[derive(Debug, Clone)]
pub struct Lane {
    pub id: u32,

    points: Vec<Point2<f64>>,

    /// Distance along the lane of each point.
    stations_m: Vec<f64>,
}

/// Position of a point relative to the closest lane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneProjection {
    /// Index of the lane in the map
    pub lane_idx: usize,

    /// Distance along the lane of the projected point
    pub s_m: f64,

    /// Signed lateral offset of the point from the centreline, positive to the left
    pub lateral_m: f64,

    /// Heading of the centreline at the projected point
    pub heading_rad: f64,
}

#[derive(Debug, Deserialize)]
struct MapRecord {
    lane_id: u32,
    x: f64,
    y: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Cannot open the map file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Cannot read the map file: {0}")]
    CsvError(csv::Error),

    #[error("The map contains no lanes")]
    Empty,

    #[error("Lane {0} has fewer than two distinct points")]
    DegenerateLane(u32),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LaneMap {
    /// Load the map from a CSV file, converting it into the local frame.
    pub fn from_csv<P: AsRef<Path>>(path: P, offsets: FrameOffsets) -> Result<Self, MapError> {
        let file = File::open(path).map_err(MapError::FileLoadError)?;
        Self::from_reader(file, offsets)
    }

    /// Load the map from any CSV source, converting it into the local frame.
    pub fn from_reader<R: Read>(reader: R, offsets: FrameOffsets) -> Result<Self, MapError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        // Group consecutive rows by lane, keeping the order lanes first appear in
        let mut lanes: Vec<(u32, Vec<Point2<f64>>)> = Vec::new();

        for record in csv_reader.deserialize() {
            let record: MapRecord = record.map_err(MapError::CsvError)?;
            let point = Point2::new(record.x - offsets.x_m, record.y - offsets.y_m);

            match lanes.iter_mut().find(|(id, _)| *id == record.lane_id) {
                Some((_, points)) => points.push(point),
                None => lanes.push((record.lane_id, vec![point])),
            }
        }

        Self::from_lanes(lanes)
    }

    /// Build the map from centrelines already in the local frame.
    pub fn from_lanes(lanes: Vec<(u32, Vec<Point2<f64>>)>) -> Result<Self, MapError> {
        if lanes.is_empty() {
            return Err(MapError::Empty);
        }

        let lanes = lanes
            .into_iter()
            .map(|(id, points)| Lane::new(id, points))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Lane map built with {} lanes, {} points",
            lanes.len(),
            lanes.iter().map(|l| l.points.len()).sum::<usize>()
        );

        Ok(Self { lanes })
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Project a point onto the closest lane centreline.
    pub fn project(&self, position: &Point2<f64>) -> LaneProjection {
        let mut best: Option<(f64, LaneProjection)> = None;

        for (lane_idx, lane) in self.lanes.iter().enumerate() {
            let (dist_m, mut proj) = lane.project(position);
            proj.lane_idx = lane_idx;

            match best {
                Some((best_dist, _)) if best_dist <= dist_m => (),
                _ => best = Some((dist_m, proj)),
            }
        }

        // The map is never empty so there is always a closest lane
        match best {
            Some((_, proj)) => proj,
            None => LaneProjection {
                lane_idx: 0,
                s_m: 0.0,
                lateral_m: 0.0,
                heading_rad: 0.0,
            },
        }
    }

    /// Point at the given distance along a lane, clamped to the ends of the lane.
    pub fn point_at(&self, lane_idx: usize, s_m: f64) -> Option<Point2<f64>> {
        self.lanes.get(lane_idx).map(|l| l.point_at(s_m))
    }
}

impl Lane {
    fn new(id: u32, mut points: Vec<Point2<f64>>) -> Result<Self, MapError> {
        // Repeated points would create zero length segments
        points.dedup_by(|a, b| (*a - *b).norm() < 1e-9);

        if points.len() < 2 {
            return Err(MapError::DegenerateLane(id));
        }

        let mut stations_m = Vec::with_capacity(points.len());
        let mut s = 0.0;
        stations_m.push(s);
        for w in points.windows(2) {
            s += (w[1] - w[0]).norm();
            stations_m.push(s);
        }

        Ok(Self {
            id,
            points,
            stations_m,
        })
    }

    /// Total length of the lane.
    pub fn length_m(&self) -> f64 {
        self.stations_m.last().copied().unwrap_or(0.0)
    }

    /// Project a point onto this lane, returning the distance to the lane and the projection.
    fn project(&self, position: &Point2<f64>) -> (f64, LaneProjection) {
        let mut best_dist = std::f64::INFINITY;
        let mut best = LaneProjection {
            lane_idx: 0,
            s_m: 0.0,
            lateral_m: 0.0,
            heading_rad: 0.0,
        };

        for i in 0..self.points.len() - 1 {
            let a = self.points[i];
            let seg: Vector2<f64> = self.points[i + 1] - a;
            let seg_len = seg.norm();
            let dir = seg / seg_len;

            let rel = position - a;
            let along = (rel.dot(&dir)).max(0.0).min(seg_len);
            let closest = a + dir * along;
            let dist = (position - closest).norm();

            if dist < best_dist {
                best_dist = dist;
                best = LaneProjection {
                    lane_idx: 0,
                    s_m: self.stations_m[i] + along,
                    // 2D cross product of the direction and the offset
                    lateral_m: dir.x * rel.y - dir.y * rel.x,
                    heading_rad: dir.y.atan2(dir.x),
                };
            }
        }

        (best_dist, best)
    }

    fn point_at(&self, s_m: f64) -> Point2<f64> {
        let s = s_m.max(0.0).min(self.length_m());

        // Index of the segment containing s
        let i = match self.stations_m.iter().position(|&st| st > s) {
            Some(0) => 0,
            Some(i) => i - 1,
            None => self.points.len() - 2,
        };

        let seg_len = self.stations_m[i + 1] - self.stations_m[i];
        let frac = (s - self.stations_m[i]) / seg_len;

        self.points[i] + (self.points[i + 1] - self.points[i]) * frac
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const CSV: &str = "lane_id,x,y
1,652000.0,5339000.0
1,652100.0,5339000.0
2,652000.0,5339003.5
2,652100.0,5339003.5
1,652200.0,5339000.0
";

    fn offsets() -> FrameOffsets {
        FrameOffsets {
            x_m: 652000.0,
            y_m: 5339000.0,
        }
    }

    #[test]
    fn test_load_csv() {
        let map = LaneMap::from_reader(CSV.as_bytes(), offsets()).unwrap();

        assert_eq!(map.lanes().len(), 2);
        assert_eq!(map.lanes()[0].id, 1);
        assert_eq!(map.lanes()[0].length_m(), 200.0);
        assert_eq!(map.lanes()[1].length_m(), 100.0);
    }

    #[test]
    fn test_project() {
        let map = LaneMap::from_reader(CSV.as_bytes(), offsets()).unwrap();

        let proj = map.project(&Point2::new(150.0, 0.5));
        assert_eq!(proj.lane_idx, 0);
        assert_eq!(proj.s_m, 150.0);
        assert_eq!(proj.lateral_m, 0.5);
        assert_eq!(proj.heading_rad, 0.0);

        let proj = map.project(&Point2::new(20.0, 3.0));
        assert_eq!(proj.lane_idx, 1);
        assert_eq!(proj.lateral_m, -0.5);
    }

    #[test]
    fn test_point_at() {
        let map = LaneMap::from_reader(CSV.as_bytes(), offsets()).unwrap();

        assert_eq!(map.point_at(0, 125.0), Some(Point2::new(125.0, 0.0)));
        assert_eq!(map.point_at(0, 500.0), Some(Point2::new(200.0, 0.0)));
        assert_eq!(map.point_at(0, -5.0), Some(Point2::new(0.0, 0.0)));
        assert_eq!(map.point_at(3, 0.0), None);
    }

    #[test]
    fn test_degenerate_lane() {
        let res = LaneMap::from_lanes(vec![(4, vec![Point2::new(1.0, 1.0), Point2::new(1.0, 1.0)])]);
        assert!(matches!(res, Err(MapError::DegenerateLane(4))));

        assert!(matches!(LaneMap::from_lanes(vec![]), Err(MapError::Empty)));
    }
}
