//! # Frame Converter
//!
//! Moves trajectory points between the vehicle's global frame and the planning engine's local
//! frame. The local frame is the global frame shifted by two fixed offsets, and local time is
//! relative time shifted by a caller supplied offset.
//!
//! The time offset is always explicit: the assembler converts with the negative of the planning
//! init point's relative time and the response is converted back with the positive value. Mixing
//! these up offsets the whole response in time.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::msg::planning::TrajectoryPoint;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Offsets of the local frame's origin in the global frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct FrameOffsets {
    /// Units: meters
    pub x_m: f64,

    /// Units: meters
    pub y_m: f64,
}

/// State of an agent in the planning engine, the engine's native 5-tuple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Time relative to the start of the current cycle.
    ///
    /// Units: seconds
    pub time_s: f64,

    /// Units: meters,
    /// Frame: Local
    pub x_m: f64,

    /// Units: meters,
    /// Frame: Local
    pub y_m: f64,

    /// Units: radians
    pub theta_rad: f64,

    /// Units: meters/second
    pub v_ms: f64,
}

/// Converts points between the global and local frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameConverter {
    offsets: FrameOffsets,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl AgentState {
    pub fn new(time_s: f64, x_m: f64, y_m: f64, theta_rad: f64, v_ms: f64) -> Self {
        Self {
            time_s,
            x_m,
            y_m,
            theta_rad,
            v_ms,
        }
    }

    /// The state as `[time, x, y, theta, v]`.
    pub fn to_array(&self) -> [f64; 5] {
        [self.time_s, self.x_m, self.y_m, self.theta_rad, self.v_ms]
    }
}

impl FrameConverter {
    pub fn new(offsets: FrameOffsets) -> Self {
        Self { offsets }
    }

    /// Convert a global trajectory point into a local agent state.
    pub fn to_local(&self, point: &TrajectoryPoint, time_offset_s: f64) -> AgentState {
        AgentState {
            time_s: point.relative_time + time_offset_s,
            x_m: point.x - self.offsets.x_m,
            y_m: point.y - self.offsets.y_m,
            theta_rad: point.theta,
            v_ms: point.v,
        }
    }

    /// Convert a local agent state back into a global trajectory point.
    pub fn to_global(&self, state: &AgentState, time_offset_s: f64) -> TrajectoryPoint {
        TrajectoryPoint {
            relative_time: state.time_s + time_offset_s,
            x: state.x_m + self.offsets.x_m,
            y: state.y_m + self.offsets.y_m,
            theta: state.theta_rad,
            v: state.v_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn converter() -> FrameConverter {
        FrameConverter::new(FrameOffsets {
            x_m: 652000.0,
            y_m: 5.339e6,
        })
    }

    #[test]
    fn test_to_local() {
        let point = TrajectoryPoint {
            relative_time: 0.75,
            x: 652012.5,
            y: 5339003.25,
            theta: 1.2,
            v: 4.0,
        };

        let state = converter().to_local(&point, -0.25);

        assert_eq!(state, AgentState::new(0.5, 12.5, 3.25, 1.2, 4.0));
    }

    #[test]
    fn test_to_global() {
        let state = AgentState::new(1.0, -2.5, 40.0, -0.3, 7.5);

        let point = converter().to_global(&state, 0.25);

        assert_eq!(point.relative_time, 1.25);
        assert_eq!(point.x, 651997.5);
        assert_eq!(point.y, 5339040.0);
        assert_eq!(point.theta, -0.3);
        assert_eq!(point.v, 7.5);
    }

    #[test]
    fn test_round_trip() {
        let conv = converter();
        let tau = 0.375;

        let points = [
            TrajectoryPoint { relative_time: tau, x: 652010.125, y: 5339020.5, theta: 0.1, v: 3.0 },
            TrajectoryPoint { relative_time: 0.5, x: 651990.0, y: 5338990.75, theta: -3.0, v: 0.0 },
            TrajectoryPoint { relative_time: 2.0, x: 652100.0625, y: 5339500.0, theta: 3.1, v: 13.9 },
            TrajectoryPoint { relative_time: 0.0, x: 652000.0, y: 5339000.0, theta: 0.0, v: 1.0 },
        ];

        for p in points.iter() {
            let back = conv.to_global(&conv.to_local(p, -tau), tau);

            assert_eq!(back.relative_time, p.relative_time);
            assert_eq!(back.x, p.x);
            assert_eq!(back.y, p.y);
            assert_eq!(back.theta, p.theta);
            assert_eq!(back.v, p.v);
        }
    }

    #[test]
    fn test_init_point_is_local_time_zero() {
        let conv = converter();
        let init = TrajectoryPoint {
            relative_time: 0.137,
            x: 652001.0,
            y: 5339001.0,
            theta: 0.0,
            v: 0.0,
        };

        assert_eq!(conv.to_local(&init, -init.relative_time).time_s, 0.0);
    }
}
