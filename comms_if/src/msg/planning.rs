//! # Planning Messages
//!
//! Request and response exchanged with the vehicle motion-planning stack. All positions are given
//! in the vehicle's global frame.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::{check_finite, Header, MsgError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single time-stamped pose and speed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// Time relative to the start of the planning cycle.
    ///
    /// Units: seconds
    pub relative_time: f64,

    /// Units: meters,
    /// Frame: Global
    pub x: f64,

    /// Units: meters,
    /// Frame: Global
    pub y: f64,

    /// Heading.
    ///
    /// Units: radians
    pub theta: f64,

    /// Speed along the heading.
    ///
    /// Units: meters/second
    pub v: f64,
}

/// An obstacle tracked by the planning stack together with its predicted motion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictedObstacle {
    /// Identifier given by the perception stack.
    #[serde(default)]
    pub id: i32,

    /// Predicted trajectory, ordered in time.
    pub prediction: Vec<TrajectoryPoint>,

    /// Units: meters
    pub box_length: f64,

    /// Units: meters
    pub box_width: f64,
}

/// Request for a new trajectory, sent by the planning stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningRequest {
    #[serde(default)]
    pub header: Header,

    /// The point at which the planned trajectory must start.
    pub planning_init_point: TrajectoryPoint,

    /// Speed the vehicle should try to reach.
    ///
    /// Units: meters/second
    #[serde(default)]
    pub velocity_desired: f64,

    #[serde(default)]
    pub obstacles: Vec<PredictedObstacle>,
}

/// Trajectory produced by the bridge in answer to a [`PlanningRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningResponse {
    pub header: Header,

    pub planned_trajectory: Vec<TrajectoryPoint>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrajectoryPoint {
    /// Check that every field of the point is a finite number.
    pub fn validate(&self) -> Result<(), MsgError> {
        check_finite("relative_time", self.relative_time)?;
        check_finite("x", self.x)?;
        check_finite("y", self.y)?;
        check_finite("theta", self.theta)?;
        check_finite("v", self.v)
    }
}

impl PlanningRequest {
    /// Decode and validate a request from its JSON wire representation.
    pub fn from_json(json: &str) -> Result<Self, MsgError> {
        let request: Self = super::from_json(json)?;
        request.validate()?;
        Ok(request)
    }

    /// Check the request for values the bridge cannot plan with.
    pub fn validate(&self) -> Result<(), MsgError> {
        self.planning_init_point.validate()?;
        check_finite("velocity_desired", self.velocity_desired)?;

        for obstacle in self.obstacles.iter() {
            for point in obstacle.prediction.iter() {
                point.validate()?;
            }
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_from_json() {
        let json = r#"{
            "planning_init_point": {"relative_time": 0.1, "x": 652010.0, "y": 5339020.0, "theta": 0.5, "v": 3.0},
            "velocity_desired": 8.0,
            "obstacles": [
                {
                    "id": 7,
                    "prediction": [
                        {"relative_time": 0.0, "x": 652030.0, "y": 5339020.0, "theta": 0.5, "v": 2.0},
                        {"relative_time": 0.5, "x": 652031.0, "y": 5339020.0, "theta": 0.5, "v": 2.0}
                    ],
                    "box_length": 4.5,
                    "box_width": 1.8
                }
            ]
        }"#;

        let request = PlanningRequest::from_json(json).unwrap();

        assert_eq!(request.header, Header::default());
        assert_eq!(request.planning_init_point.relative_time, 0.1);
        assert_eq!(request.velocity_desired, 8.0);
        assert_eq!(request.obstacles.len(), 1);
        assert_eq!(request.obstacles[0].id, 7);
        assert_eq!(request.obstacles[0].prediction.len(), 2);
    }

    #[test]
    fn test_request_missing_init_point() {
        let json = r#"{"velocity_desired": 8.0, "obstacles": []}"#;

        assert!(matches!(
            PlanningRequest::from_json(json),
            Err(MsgError::DeserializeError(_))
        ));
    }

    #[test]
    fn test_request_invalid_values() {
        let mut request = PlanningRequest::default();
        request.obstacles.push(PredictedObstacle {
            id: 1,
            prediction: vec![TrajectoryPoint::default()],
            box_length: 0.0,
            box_width: 1.0,
        });

        // Footprints are not checked here, only numeric validity
        assert!(request.validate().is_ok());

        request.obstacles[0].prediction[0].x = std::f64::INFINITY;
        assert!(matches!(request.validate(), Err(MsgError::InvalidValue("x", _))));

        request.obstacles[0].prediction[0].x = 0.0;
        request.planning_init_point.v = std::f64::NAN;
        assert!(matches!(request.validate(), Err(MsgError::InvalidValue("v", _))));
    }
}
