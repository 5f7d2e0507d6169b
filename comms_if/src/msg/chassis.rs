//! # Chassis Telemetry Messages

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use super::{check_finite, MsgError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Chassis report as published by the vehicle's CAN bus driver.
///
/// Each actuator group is optional on the wire since not every vehicle reports every group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisDetail {
    /// Time at which the report was generated.
    ///
    /// Units: seconds
    pub timestamp: Option<f64>,

    #[serde(default)]
    pub steering: Option<SteeringReport>,

    #[serde(default)]
    pub gas: Option<GasReport>,

    #[serde(default)]
    pub brake: Option<BrakeReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SteeringReport {
    /// Torque applied on the steering wheel by the driver.
    ///
    /// Units: newton meters
    pub steering_wheel_torque: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GasReport {
    /// Throttle pedal input, in percent.
    pub throttle_input: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BrakeReport {
    /// Brake pedal input, in percent.
    pub brake_input: f64,
}

/// Flat actuator readings extracted from a complete [`ChassisDetail`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisTelemetry {
    pub timestamp: f64,
    pub steering_wheel_torque: f64,
    pub throttle_input: f64,
    pub brake_input: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TryFrom<ChassisDetail> for ChassisTelemetry {
    type Error = MsgError;

    fn try_from(detail: ChassisDetail) -> Result<Self, Self::Error> {
        let timestamp = detail.timestamp.ok_or(MsgError::MissingField("timestamp"))?;
        let steering = detail.steering.ok_or(MsgError::MissingField("steering"))?;
        let gas = detail.gas.ok_or(MsgError::MissingField("gas"))?;
        let brake = detail.brake.ok_or(MsgError::MissingField("brake"))?;

        check_finite("timestamp", timestamp)?;
        check_finite("steering_wheel_torque", steering.steering_wheel_torque)?;
        check_finite("throttle_input", gas.throttle_input)?;
        check_finite("brake_input", brake.brake_input)?;

        Ok(Self {
            timestamp,
            steering_wheel_torque: steering.steering_wheel_torque,
            throttle_input: gas.throttle_input,
            brake_input: brake.brake_input,
        })
    }
}

impl ChassisTelemetry {
    /// Decode a [`ChassisDetail`] from JSON and flatten it into telemetry.
    pub fn from_json(json: &str) -> Result<Self, MsgError> {
        let detail: ChassisDetail = super::from_json(json)?;
        Self::try_from(detail)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_telemetry_from_json() {
        let json = r#"{
            "timestamp": 12.5,
            "steering": {"steering_wheel_torque": 1.5},
            "gas": {"throttle_input": 20.0},
            "brake": {"brake_input": 0.0}
        }"#;

        let tm = ChassisTelemetry::from_json(json).unwrap();

        assert_eq!(
            tm,
            ChassisTelemetry {
                timestamp: 12.5,
                steering_wheel_torque: 1.5,
                throttle_input: 20.0,
                brake_input: 0.0,
            }
        );
    }

    #[test]
    fn test_telemetry_missing_group() {
        let json = r#"{
            "timestamp": 12.5,
            "steering": {"steering_wheel_torque": 1.5},
            "brake": {"brake_input": 0.0}
        }"#;

        assert!(matches!(
            ChassisTelemetry::from_json(json),
            Err(MsgError::MissingField("gas"))
        ));
    }

    #[test]
    fn test_telemetry_missing_timestamp() {
        let detail = ChassisDetail {
            timestamp: None,
            steering: Some(SteeringReport::default()),
            gas: Some(GasReport::default()),
            brake: Some(BrakeReport::default()),
        };

        assert!(matches!(
            ChassisTelemetry::try_from(detail),
            Err(MsgError::MissingField("timestamp"))
        ));
    }
}
