//! # Interaction Monitor
//!
//! Watches chassis telemetry for human inputs on the actuators. Any message in which the steering
//! torque, throttle or brake exceeds its limit is treated as the driver taking over, and the
//! message's timestamp is recorded in the interaction log.
//!
//! The monitor is not edge triggered: every qualifying message is recorded, not only the first of
//! a run.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::{Mutex, PoisonError};

use comms_if::msg::chassis::ChassisTelemetry;
use log::info;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Limits above which an actuator input counts as a driver interaction.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct InteractionLimits {
    /// Units: newton meters
    pub steering_wheel_torque_limit: f64,

    /// Units: percent
    pub throttle_limit: f64,

    /// Units: percent
    pub brake_limit: f64,
}

/// Which inputs exceeded their limits in a telemetry message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InteractionCause {
    pub steering: bool,
    pub throttle: bool,
    pub brake: bool,
}

/// Detects driver interactions and keeps the timestamps at which they occured.
#[derive(Debug)]
pub struct InteractionMonitor {
    limits: InteractionLimits,

    /// Append only, grows for the lifetime of the process.
    log: Mutex<Vec<f64>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl InteractionLimits {
    /// Evaluate each limit against the telemetry.
    pub fn check(&self, tm: &ChassisTelemetry) -> InteractionCause {
        InteractionCause {
            steering: tm.steering_wheel_torque > self.steering_wheel_torque_limit,
            throttle: tm.throttle_input > self.throttle_limit,
            brake: tm.brake_input > self.brake_limit,
        }
    }
}

impl InteractionCause {
    pub fn any(&self) -> bool {
        self.steering || self.throttle || self.brake
    }
}

impl InteractionMonitor {
    pub fn new(limits: InteractionLimits) -> Self {
        Self {
            limits,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Process one telemetry message, returning `true` if an interaction was recorded.
    pub fn on_telemetry(&self, tm: &ChassisTelemetry) -> bool {
        let cause = self.limits.check(tm);

        if !cause.any() {
            return false;
        }

        // A poisoned log only means another writer panicked mid-push, the Vec itself is intact
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tm.timestamp);

        info!(
            "Found driver interaction at t = {} (steering: {}, throttle: {}, brake: {})",
            tm.timestamp, cause.steering, cause.throttle, cause.brake
        );

        true
    }

    /// Copy of the interaction log, in the order the interactions were detected.
    pub fn interactions(&self) -> Vec<f64> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn num_interactions(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
